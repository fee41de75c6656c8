//! Wire types exchanged with the sandbox.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SandboxError;

/// A shell command to run in the sandbox.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunRequest {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Timeout override in seconds; `None` or `0` means the client default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl RunRequest {
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

    /// Set an environment variable. A repeated key replaces the earlier value.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Output of a buffered command execution.
///
/// A non-zero `exit_code` is still a successful exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "code", alias = "exit_code")]
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.as_deref().map_or(true, str::is_empty)
    }
}

/// A background process known to the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub status: String,
    #[serde(alias = "cmd")]
    pub command: String,
    #[serde(alias = "start_time", deserialize_with = "de_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
}

/// A single log line from a background process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogEntry {
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub stream: String,
    pub data: String,
}

/// A file or directory in the sandbox filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirEntry {
    #[serde(deserialize_with = "de_null_default")]
    pub name: String,
    #[serde(deserialize_with = "de_null_default")]
    pub is_dir: bool,
    #[serde(deserialize_with = "de_null_default")]
    pub size: u64,
    #[serde(deserialize_with = "de_timestamp")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "de_null_default")]
    pub mode: String,
}

impl DirEntry {
    /// Entry known only by name. A trailing `/` marks a directory.
    pub fn from_name(name: &str) -> Self {
        match name.strip_suffix('/') {
            Some(dir) if !dir.is_empty() => Self {
                name: dir.to_string(),
                is_dir: true,
                ..Default::default()
            },
            _ => Self {
                name: name.to_string(),
                ..Default::default()
            },
        }
    }
}

/// Result of a port bind request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortBinding {
    #[serde(deserialize_with = "de_null_default")]
    pub port: u16,
    #[serde(deserialize_with = "de_null_default")]
    pub success: bool,
    pub proxy_port: Option<u16>,
    /// Port already bound when the request was refused.
    pub current_port: Option<u16>,
    pub error: Option<String>,
}

/// What the sandbox's TCP proxy currently exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Unbound,
    Bound { port: u16, proxy_port: Option<u16> },
}

impl PortStatus {
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Unbound => None,
            Self::Bound { port, .. } => Some(*port),
        }
    }
}

/// Sandbox liveness report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: String,
    #[serde(deserialize_with = "de_lenient_string")]
    pub uptime: Option<String>,
    pub version: Option<String>,
    pub proxy_port: Option<u16>,
}

/// `{success, error}` acknowledgement returned by mutating endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Ack {
    pub success: bool,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl Ack {
    /// Turn a refusal into [`SandboxError::Remote`], naming the operation when
    /// the sandbox gave no reason.
    pub fn into_result(self, operation: &str) -> Result<(), SandboxError> {
        if self.success {
            return Ok(());
        }
        let reason = self
            .error
            .or(self.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{} failed", operation));
        Err(SandboxError::Remote(reason))
    }
}

/// Accept an RFC 3339 string or integer Unix seconds; anything else is `None`.
pub(crate) fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        _ => None,
    })
}

/// Treat an explicit `null` like a missing field.
fn de_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept a string or a number, rendering numbers as text.
fn de_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
