//! Remote sandbox client.
//!
//! A [`SandboxClient`] is bound to one sandbox address and credential and
//! carries no other state, so one instance can serve concurrent operations
//! from many tasks. Every operation takes a [`CancellationToken`]; cancelling
//! it aborts the in-flight request (or retry backoff) with
//! [`SandboxError::Cancelled`](crate::error::SandboxError::Cancelled).

pub mod completion;
pub mod config;
mod exec;
mod fs;
mod health;
mod port;
mod process;
pub mod sse;
mod transport;
pub mod types;

pub use tokio_util::sync::CancellationToken;

pub use completion::{Completion, CompletionSender, CompletionWaiter};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use exec::RunEvent;
pub use process::{LogEvent, StartProcessRequest, StartedProcess};
pub use sse::StreamEvent;
pub use types::{
    DirEntry, HealthStatus, LogEntry, PortBinding, PortStatus, ProcessInfo, RunRequest, RunResult,
};

use crate::error::Result;
use transport::Transport;

/// Client for one remote sandbox.
pub struct SandboxClient {
    transport: Transport,
}

impl SandboxClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(config)?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }
}

/// Pull a human-readable message out of an error payload: the `error` or
/// `message` field of a JSON object, or the raw text.
pub(crate) fn error_message(payload: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(payload) {
        for key in ["error", "message"] {
            if let Some(serde_json::Value::String(msg)) = map.get(key) {
                if !msg.is_empty() {
                    return msg.clone();
                }
            }
        }
    }
    payload.trim().to_string()
}
