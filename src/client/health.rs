//! Sandbox liveness check.

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::transport::{read_bytes, Call};
use crate::client::types::HealthStatus;
use crate::client::SandboxClient;
use crate::error::{Result, SandboxError};

impl SandboxClient {
    /// Check whether the sandbox is up.
    ///
    /// A non-200 answer is reported as an unhealthy status rather than an
    /// error. A 200 answer whose body cannot be decoded still counts as
    /// healthy. Only an unreachable sandbox, a timeout or cancellation is an
    /// error.
    pub async fn health(&self, cancel: &CancellationToken) -> Result<HealthStatus> {
        let response = match self.transport.send(Call::get("/health"), cancel).await {
            Ok(response) => response,
            Err(SandboxError::RetriesExhausted {
                last_status: Some(status),
                ..
            }) => return Ok(unhealthy(status)),
            Err(e) => return Err(e),
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            debug!(status = status.as_u16(), "Sandbox reported unhealthy");
            return Ok(unhealthy(status.as_u16()));
        }

        let body = read_bytes(response, cancel).await?;
        Ok(decode_health(&body))
    }
}

fn unhealthy(status: u16) -> HealthStatus {
    HealthStatus {
        healthy: false,
        status: format!("HTTP {}", status),
        ..Default::default()
    }
}

/// Decode a 200 health body. Missing `healthy` means healthy; an
/// undecodable body means healthy with no telemetry.
pub(crate) fn decode_health(body: &[u8]) -> HealthStatus {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        debug!("Health body not decodable, assuming healthy");
        return HealthStatus {
            healthy: true,
            status: "ok".to_string(),
            ..Default::default()
        };
    };

    let healthy = value.get("healthy").and_then(Value::as_bool).unwrap_or(true);
    let mut health = HealthStatus::deserialize(&value).unwrap_or_default();
    health.healthy = healthy;
    if health.status.is_empty() {
        health.status = if healthy { "ok" } else { "unhealthy" }.to_string();
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_health_body() {
        let health = decode_health(
            br#"{"healthy":true,"status":"ok","uptime":"3h2m","version":"1.4.0","proxy_port":31000}"#,
        );
        assert!(health.healthy);
        assert_eq!(health.version.as_deref(), Some("1.4.0"));
        assert_eq!(health.uptime.as_deref(), Some("3h2m"));
        assert_eq!(health.proxy_port, Some(31000));
    }

    #[test]
    fn test_missing_flag_means_healthy() {
        let health = decode_health(br#"{"status":"running"}"#);
        assert!(health.healthy);
        assert_eq!(health.status, "running");
    }

    #[test]
    fn test_explicit_unhealthy() {
        let health = decode_health(br#"{"healthy":false}"#);
        assert!(!health.healthy);
        assert_eq!(health.status, "unhealthy");
    }

    #[test]
    fn test_garbage_body_assumed_healthy() {
        let health = decode_health(b"<html>OK</html>");
        assert!(health.healthy);
        assert_eq!(health.status, "ok");
    }
}
