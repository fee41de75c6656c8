//! Background process management and log streaming.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::sse::{self, StreamEvent};
use crate::client::transport::{ensure_success, read_bytes, read_json, Call};
use crate::client::types::{Ack, LogEntry, ProcessInfo};
use crate::client::{error_message, SandboxClient};
use crate::error::{Result, SandboxError};

/// Parameters for starting a background process.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StartProcessRequest {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StartProcessRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Identity of a freshly started process.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StartedProcess {
    pub id: String,
    pub pid: Option<u32>,
    pub status: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct StartResponse {
    id: String,
    pid: Option<u32>,
    status: String,
    error: Option<String>,
}

/// A decoded event from `/process_logs_streaming`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Log(LogEntry),
    Complete,
    Error(String),
    Other(String),
}

impl LogEvent {
    pub fn parse(event: StreamEvent) -> Result<Self> {
        match event.name.as_str() {
            "log" => serde_json::from_str(&event.data)
                .map(Self::Log)
                .map_err(|e| SandboxError::decode("log event", e)),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error(error_message(&event.data))),
            _ => Ok(Self::Other(event.name)),
        }
    }
}

#[derive(Serialize)]
struct KillRequest<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signal: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProcessListShape {
    Wrapped { processes: Vec<ProcessInfo> },
    Bare(Vec<ProcessInfo>),
}

impl SandboxClient {
    /// Start a background process.
    pub async fn start_process(
        &self,
        request: &StartProcessRequest,
        cancel: &CancellationToken,
    ) -> Result<StartedProcess> {
        debug!(cmd = %request.cmd, "Starting background process");

        let call = Call::post("/start_process").json(request)?;
        let response = self.transport.send(call, cancel).await?;

        let status = response.status();
        if status != StatusCode::CREATED && status != StatusCode::OK {
            let body = read_bytes(response, cancel).await?;
            return Err(SandboxError::Status {
                status: status.as_u16(),
                body: error_message(&String::from_utf8_lossy(&body)),
            });
        }

        let started: StartResponse = read_json(response, "start_process", cancel).await?;
        if started.id.is_empty() {
            return Err(match started.error.filter(|e| !e.is_empty()) {
                Some(error) => SandboxError::Remote(error),
                None => SandboxError::decode("start_process", "missing process id"),
            });
        }
        let started = StartedProcess {
            id: started.id,
            pid: started.pid,
            status: started.status,
        };

        debug!(id = %started.id, pid = ?started.pid, "Process started");
        Ok(started)
    }

    /// Snapshot of every process the sandbox knows about.
    pub async fn list_processes(&self, cancel: &CancellationToken) -> Result<Vec<ProcessInfo>> {
        let response = self
            .transport
            .send(Call::get("/list_processes"), cancel)
            .await?;
        let response = ensure_success(response, cancel).await?;
        let bytes = read_bytes(response, cancel).await?;

        let processes = match serde_json::from_slice::<ProcessListShape>(&bytes) {
            Ok(ProcessListShape::Wrapped { processes }) => processes,
            Ok(ProcessListShape::Bare(processes)) => processes,
            Err(e) => return Err(SandboxError::decode("list_processes", e)),
        };

        trace!(count = processes.len(), "Processes listed");
        Ok(processes)
    }

    /// Terminate a process with the sandbox's default signal.
    pub async fn kill_process(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.kill(id, None, cancel).await
    }

    /// Terminate a process with an explicit signal name such as `SIGKILL`.
    pub async fn kill_process_with_signal(
        &self,
        id: &str,
        signal: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.kill(id, Some(signal), cancel).await
    }

    async fn kill(&self, id: &str, signal: Option<&str>, cancel: &CancellationToken) -> Result<()> {
        debug!(id = %id, signal = ?signal, "Killing process");

        let call = Call::post("/kill_process").json(&KillRequest { id, signal })?;
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let ack: Ack = read_json(response, "kill_process", cancel).await?;
        ack.into_result("kill_process")
    }

    /// Stream a process's logs to `on_log`.
    ///
    /// With `follow` the stream stays open for new output until the process
    /// ends, the server sends `complete`, or `cancel` fires. Without it the
    /// server replays existing logs and closes the stream. Either way the end
    /// of the stream is decided by the server, never guessed here.
    pub async fn stream_process_logs<F>(
        &self,
        id: &str,
        follow: bool,
        cancel: &CancellationToken,
        mut on_log: F,
    ) -> Result<()>
    where
        F: FnMut(&LogEntry),
    {
        debug!(id = %id, follow, "Streaming process logs");

        let call = Call::get("/process_logs_streaming")
            .query("id", id)
            .query("follow", follow.to_string())
            .timeout(self.config().stream_timeout);
        let response = self.transport.send_once(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;

        let flow = sse::consume(response, cancel, |event| match LogEvent::parse(event)? {
            LogEvent::Log(entry) => {
                on_log(&entry);
                Ok(ControlFlow::Continue(()))
            }
            LogEvent::Complete => Ok(ControlFlow::Break(())),
            LogEvent::Error(message) => Err(SandboxError::Stream(message)),
            LogEvent::Other(name) => {
                trace!(event = %name, "Ignoring log stream event");
                Ok(ControlFlow::Continue(()))
            }
        })
        .await?;

        match flow {
            ControlFlow::Break(()) => trace!(id = %id, "Log stream completed"),
            ControlFlow::Continue(()) => trace!(id = %id, "Log stream closed by sandbox"),
        }
        Ok(())
    }
}
