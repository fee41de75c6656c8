//! HTTP transport for the sandbox API.
//!
//! One logical request maps to one or more HTTP attempts. Network errors and
//! 5xx responses are retried with linear backoff; every other response is
//! handed back to the caller untouched for interpretation.

use std::time::Duration;

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::config::ClientConfig;
use crate::client::error_message;
use crate::error::{Result, SandboxError};

/// Timeout for establishing the TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// A single API call: method, path relative to the API prefix, optional
/// query and JSON body.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
    timeout: Option<Duration>,
}

impl Call {
    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Attach a JSON body. Serialized once so retries resend identical bytes.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    /// Override the configured timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) struct Transport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Transport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform a call, retrying network errors and 5xx responses.
    ///
    /// Returns the first response with a status below 500. The call's timeout
    /// is one deadline for every attempt and backoff wait together; reaching
    /// it returns [`SandboxError::Timeout`] and is never retried. Cancellation
    /// during an attempt or a backoff wait returns [`SandboxError::Cancelled`].
    pub async fn send(&self, call: Call, cancel: &CancellationToken) -> Result<Response> {
        let timeout = call.timeout.unwrap_or(self.config.timeout);
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, self.send_until(&call, deadline, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(deadline_exceeded(&call, timeout)),
        }
    }

    async fn send_until(
        &self,
        call: &Call,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let attempts = self.config.max_retries + 1;
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay * (attempt - 1);
                debug!(
                    path = %call.path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying sandbox request"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.attempt(call, remaining, cancel).await {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status().as_u16();
                    let body = match read_text(response, cancel).await {
                        Ok(body) => body,
                        Err(e @ (SandboxError::Cancelled | SandboxError::Timeout(_))) => {
                            return Err(e)
                        }
                        Err(_) => String::new(),
                    };
                    debug!(path = %call.path, attempt, status, "Sandbox server error");
                    last_status = Some(status);
                    last_error = format!("HTTP {}: {}", status, truncate(&body));
                }
                Ok(response) => return Ok(response),
                Err(e @ (SandboxError::Cancelled | SandboxError::Timeout(_))) => return Err(e),
                Err(e) => {
                    debug!(path = %call.path, attempt, error = %e, "Sandbox request failed");
                    last_status = None;
                    last_error = e.to_string();
                }
            }
        }

        Err(SandboxError::RetriesExhausted {
            attempts,
            last_status,
            message: last_error,
        })
    }

    /// Perform a call exactly once, returning whatever response arrives.
    ///
    /// Used for streaming endpoints, where a partially delivered body must
    /// never be replayed.
    pub async fn send_once(&self, call: Call, cancel: &CancellationToken) -> Result<Response> {
        let timeout = call.timeout.unwrap_or(self.config.timeout);
        self.attempt(&call, timeout, cancel).await
    }

    async fn attempt(
        &self,
        call: &Call,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if timeout.is_zero() {
            return Err(deadline_exceeded(call, timeout));
        }
        let url = self.config.url(&call.path);

        let mut request = self
            .http
            .request(call.method.clone(), &url)
            .bearer_auth(&self.config.token)
            .timeout(timeout);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        trace!(method = %call.method, url = %url, "Sandbox request");

        tokio::select! {
            _ = cancel.cancelled() => Err(SandboxError::Cancelled),
            result = request.send() => Ok(result?),
        }
    }
}

fn deadline_exceeded(call: &Call, timeout: Duration) -> SandboxError {
    SandboxError::Timeout(format!(
        "{} {} exceeded {:?}",
        call.method, call.path, timeout
    ))
}

/// Fail with [`SandboxError::Status`] unless the response is 2xx.
pub(crate) async fn ensure_success(
    response: Response,
    cancel: &CancellationToken,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_text(response, cancel).await?;
    Err(SandboxError::Status {
        status: status.as_u16(),
        body: truncate(&error_message(&body)),
    })
}

/// Read the whole body, aborting on cancellation.
pub(crate) async fn read_bytes(response: Response, cancel: &CancellationToken) -> Result<Vec<u8>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SandboxError::Cancelled),
        body = response.bytes() => Ok(body?.to_vec()),
    }
}

pub(crate) async fn read_text(response: Response, cancel: &CancellationToken) -> Result<String> {
    let bytes = read_bytes(response, cancel).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read the body and decode it as JSON of type `T`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    context: &str,
    cancel: &CancellationToken,
) -> Result<T> {
    let bytes = read_bytes(response, cancel).await?;
    serde_json::from_slice(&bytes).map_err(|e| SandboxError::decode(context, e))
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let out = truncate(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_ERROR_BODY + 3);
    }

    #[test]
    fn test_call_json_body_serialized_once() {
        let call = Call::post("/run")
            .json(&serde_json::json!({"cmd": "ls"}))
            .unwrap()
            .timeout(Duration::from_secs(5));
        assert_eq!(call.body, Some(serde_json::json!({"cmd": "ls"})));
        assert_eq!(call.timeout, Some(Duration::from_secs(5)));
        assert_eq!(call.method, Method::POST);
    }
}
