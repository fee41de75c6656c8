//! TCP port exposure through the sandbox proxy.
//!
//! The sandbox allows one bound port at a time. A refused bind is reported as
//! [`SandboxError::PortInUse`] carrying the active port; the caller decides
//! whether to unbind it.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::transport::{ensure_success, read_bytes, read_json, Call};
use crate::client::types::{Ack, PortBinding, PortStatus};
use crate::client::{error_message, SandboxClient};
use crate::error::{Result, SandboxError};

#[derive(Serialize)]
struct BindRequest {
    port: u16,
}

impl SandboxClient {
    /// Expose `port` through the sandbox's TCP proxy.
    pub async fn bind_port(&self, port: u16, cancel: &CancellationToken) -> Result<PortBinding> {
        debug!(port, "Binding port");

        let call = Call::post("/bind_port").json(&BindRequest { port })?;
        let response = self.transport.send(call, cancel).await?;
        let status = response.status();
        let body = read_bytes(response, cancel).await?;

        // Refusals may come back as 200 with success:false or as a 4xx; both
        // carry the same body.
        if let Ok(binding) = serde_json::from_slice::<PortBinding>(&body) {
            if status.is_success() && binding.success {
                debug!(port, proxy_port = ?binding.proxy_port, "Port bound");
                return Ok(PortBinding {
                    port: if binding.port == 0 { port } else { binding.port },
                    ..binding
                });
            }
            if let Some(current_port) = binding.current_port.filter(|&p| p != 0) {
                return Err(SandboxError::PortInUse {
                    requested: port,
                    current_port,
                });
            }
            if status.is_success() {
                return Err(SandboxError::Remote(
                    binding
                        .error
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "bind_port failed".to_string()),
                ));
            }
        }

        if !status.is_success() {
            return Err(SandboxError::Status {
                status: status.as_u16(),
                body: error_message(&String::from_utf8_lossy(&body)),
            });
        }

        Err(SandboxError::decode(
            "bind_port",
            "response is not a port binding",
        ))
    }

    /// Release the current binding.
    ///
    /// Returns `false` when nothing was bound, which is not an error.
    pub async fn unbind_port(&self, cancel: &CancellationToken) -> Result<bool> {
        debug!("Unbinding port");

        let response = self.transport.send(Call::post("/unbind_port"), cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let ack: Ack = read_json(response, "unbind_port", cancel).await?;

        if ack.success {
            return Ok(true);
        }
        match ack.error.filter(|e| !e.is_empty()) {
            Some(error) => Err(SandboxError::Remote(error)),
            None => Ok(false),
        }
    }

    /// Which port, if any, is currently exposed.
    pub async fn get_port_status(&self, cancel: &CancellationToken) -> Result<PortStatus> {
        let response = self.transport.send(Call::get("/port_status"), cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let body = read_bytes(response, cancel).await?;
        decode_port_status(&body)
    }
}

/// Decode a port status body: an object, a bare port number, or
/// `null`/nothing for "no port bound".
pub(crate) fn decode_port_status(body: &[u8]) -> Result<PortStatus> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PortStatus::Unbound);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| SandboxError::decode("port_status", e))?;

    match value {
        Value::Null => Ok(PortStatus::Unbound),
        Value::Number(n) => Ok(bound_or_unbound(port_from_number(&n)?, None)),
        Value::Object(map) => {
            if let Some(error) = map.get("error").and_then(Value::as_str) {
                if !error.is_empty() {
                    return Err(SandboxError::Remote(error.to_string()));
                }
            }
            if map.get("bound").and_then(Value::as_bool) == Some(false) {
                return Ok(PortStatus::Unbound);
            }

            let port = ["port", "current_port", "bound_port"]
                .iter()
                .find_map(|key| match map.get(*key) {
                    Some(Value::Number(n)) => Some(port_from_number(n)),
                    _ => None,
                })
                .transpose()?
                .unwrap_or(0);
            let proxy_port = match map.get("proxy_port") {
                Some(Value::Number(n)) => Some(port_from_number(n)?).filter(|&p| p != 0),
                _ => None,
            };
            Ok(bound_or_unbound(port, proxy_port))
        }
        other => Err(SandboxError::decode(
            "port_status",
            format!("unexpected JSON value: {}", other),
        )),
    }
}

fn port_from_number(n: &serde_json::Number) -> Result<u16> {
    n.as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| SandboxError::decode("port_status", format!("invalid port {}", n)))
}

fn bound_or_unbound(port: u16, proxy_port: Option<u16>) -> PortStatus {
    if port == 0 {
        PortStatus::Unbound
    } else {
        PortStatus::Bound { port, proxy_port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_status_unbound_shapes() {
        assert_eq!(decode_port_status(b"").unwrap(), PortStatus::Unbound);
        assert_eq!(decode_port_status(b"  \n").unwrap(), PortStatus::Unbound);
        assert_eq!(decode_port_status(b"null").unwrap(), PortStatus::Unbound);
        assert_eq!(decode_port_status(b"0").unwrap(), PortStatus::Unbound);
        assert_eq!(
            decode_port_status(br#"{"port":0}"#).unwrap(),
            PortStatus::Unbound
        );
        assert_eq!(
            decode_port_status(br#"{"bound":false,"port":8080}"#).unwrap(),
            PortStatus::Unbound
        );
    }

    #[test]
    fn test_port_status_bound_shapes() {
        assert_eq!(
            decode_port_status(b"8080").unwrap(),
            PortStatus::Bound {
                port: 8080,
                proxy_port: None
            }
        );
        assert_eq!(
            decode_port_status(br#"{"port":8080,"proxy_port":31000}"#).unwrap(),
            PortStatus::Bound {
                port: 8080,
                proxy_port: Some(31000)
            }
        );
        assert_eq!(
            decode_port_status(br#"{"current_port":3000}"#).unwrap().port(),
            Some(3000)
        );
    }

    #[test]
    fn test_port_status_rejects_garbage() {
        assert!(decode_port_status(b"\"eighty\"").is_err());
        assert!(decode_port_status(b"70000").is_err());
        assert!(decode_port_status(b"{").is_err());
    }
}
