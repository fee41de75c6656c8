//! Buffered and streaming command execution.

use std::ops::ControlFlow;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::sse::{self, StreamEvent};
use crate::client::transport::{ensure_success, read_json, Call};
use crate::client::types::{RunRequest, RunResult};
use crate::client::{error_message, SandboxClient};
use crate::error::{Result, SandboxError};

/// Added to the command timeout so the sandbox can report its own timeout
/// before the HTTP request is cut off.
const RUN_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

/// A decoded event from `/run_streaming`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Output { stream: String, data: String },
    Complete { code: i32, had_error: bool },
    Error(String),
    /// Event name this client does not interpret.
    Other(String),
}

impl RunEvent {
    pub fn parse(event: StreamEvent) -> Result<Self> {
        match event.name.as_str() {
            "output" => {
                let payload: OutputPayload = serde_json::from_str(&event.data)
                    .map_err(|e| SandboxError::decode("output event", e))?;
                Ok(Self::Output {
                    stream: payload.stream,
                    data: payload.data,
                })
            }
            "complete" => {
                let payload: CompletePayload = serde_json::from_str(&event.data)
                    .map_err(|e| SandboxError::decode("complete event", e))?;
                Ok(Self::Complete {
                    code: payload.code,
                    had_error: payload.error,
                })
            }
            "error" => Ok(Self::Error(error_message(&event.data))),
            _ => Ok(Self::Other(event.name)),
        }
    }
}

#[derive(Deserialize)]
struct OutputPayload {
    #[serde(default)]
    stream: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct CompletePayload {
    #[serde(default, alias = "exit_code")]
    code: i32,
    #[serde(default, deserialize_with = "de_error_flag")]
    error: bool,
}

/// `error` is a boolean in current servers; older ones send a message string.
fn de_error_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => false,
    })
}

impl SandboxClient {
    /// Run a command and wait for its buffered output.
    ///
    /// The request timeout is the request's own `timeout` when set and
    /// non-zero, otherwise the client default.
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        let timeout = request
            .timeout
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.config().timeout);

        debug!(cmd = %request.cmd, timeout_secs = timeout.as_secs(), "Running command");

        let call = Call::post("/run")
            .json(request)?
            .timeout(timeout + RUN_TIMEOUT_GRACE);
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let result: RunResult = read_json(response, "run", cancel).await?;

        debug!(
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Command completed"
        );
        Ok(result)
    }

    /// Run a command, streaming its output as it is produced.
    ///
    /// `on_output` receives `(stream, chunk)` for every output event in wire
    /// order. `on_complete` receives `(exit_code, had_error)` at most once and
    /// is always the last callback; the connection is closed right after it.
    /// A stream that ends without a `complete` event fails with
    /// [`SandboxError::StreamClosed`], and an `error` event fails with
    /// [`SandboxError::Stream`].
    ///
    /// The request is never retried: a partially delivered stream cannot be
    /// replayed safely.
    pub async fn run_streaming<O, C>(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        mut on_output: O,
        on_complete: C,
    ) -> Result<()>
    where
        O: FnMut(&str, &str),
        C: FnOnce(i32, bool),
    {
        debug!(cmd = %request.cmd, "Running command with streaming output");

        let call = Call::post("/run_streaming")
            .json(request)?
            .timeout(self.config().stream_timeout);
        let response = self.transport.send_once(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;

        let mut on_complete = Some(on_complete);
        let flow = sse::consume(response, cancel, |event| match RunEvent::parse(event)? {
            RunEvent::Output { stream, data } => {
                on_output(&stream, &data);
                Ok(ControlFlow::Continue(()))
            }
            RunEvent::Complete { code, had_error } => {
                if let Some(complete) = on_complete.take() {
                    complete(code, had_error);
                }
                Ok(ControlFlow::Break(()))
            }
            RunEvent::Error(message) => Err(SandboxError::Stream(message)),
            RunEvent::Other(name) => {
                trace!(event = %name, "Ignoring run stream event");
                Ok(ControlFlow::Continue(()))
            }
        })
        .await?;

        match flow {
            ControlFlow::Break(()) => Ok(()),
            ControlFlow::Continue(()) => Err(SandboxError::StreamClosed),
        }
    }
}
