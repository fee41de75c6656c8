//! Sandbox filesystem operations.
//!
//! Paths are sandbox-absolute and passed through untouched, except that the
//! delete operations refuse an empty path or the filesystem root.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::transport::{ensure_success, read_bytes, read_json, Call};
use crate::client::types::{Ack, DirEntry};
use crate::client::SandboxClient;
use crate::error::{Result, SandboxError};

#[derive(Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    path: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    is_base64: bool,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ReadResponse {
    content: String,
    is_base64: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StructuredListing {
    entries: Vec<DirEntry>,
}

#[derive(Deserialize)]
struct NameListing {
    entries: Vec<String>,
}

impl SandboxClient {
    /// Write text content to a file, replacing it if it exists.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(path = %path, content_len = content.len(), "Writing file");
        self.write(path, content, false, cancel).await
    }

    /// Write arbitrary bytes. Valid UTF-8 is sent as text; anything else is
    /// sent base64-encoded and flagged so the sandbox decodes it.
    pub async fn write_file_bytes(
        &self,
        path: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(path = %path, content_len = content.len(), "Writing file bytes");
        match std::str::from_utf8(content) {
            Ok(text) => self.write(path, text, false, cancel).await,
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(content);
                self.write(path, &encoded, true, cancel).await
            }
        }
    }

    async fn write(
        &self,
        path: &str,
        content: &str,
        is_base64: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::post("/write_file").json(&WriteRequest {
            path,
            content,
            is_base64,
        })?;
        self.acknowledged(call, "write_file", cancel).await
    }

    /// Read a file's raw bytes, decoding base64 transfers.
    pub async fn read_file(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        debug!(path = %path, "Reading file");

        let call = Call::post("/read_file").json(&PathRequest { path })?;
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let read: ReadResponse = read_json(response, "read_file", cancel).await?;

        if let Some(error) = read.error.filter(|e| !e.is_empty()) {
            return Err(SandboxError::Remote(error));
        }

        if read.is_base64 {
            base64::engine::general_purpose::STANDARD
                .decode(read.content.trim())
                .map_err(|e| SandboxError::decode("read_file", e))
        } else {
            Ok(read.content.into_bytes())
        }
    }

    pub async fn delete_file(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_deletable(path)?;
        debug!(path = %path, "Deleting file");
        let call = Call::post("/delete_file").json(&PathRequest { path })?;
        self.acknowledged(call, "delete_file", cancel).await
    }

    pub async fn make_dir(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        debug!(path = %path, "Creating directory");
        let call = Call::post("/make_dir").json(&PathRequest { path })?;
        self.acknowledged(call, "make_dir", cancel).await
    }

    pub async fn delete_dir(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_deletable(path)?;
        debug!(path = %path, "Deleting directory");
        let call = Call::post("/delete_dir").json(&PathRequest { path })?;
        self.acknowledged(call, "delete_dir", cancel).await
    }

    /// List a directory.
    pub async fn list_dir(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<DirEntry>> {
        debug!(path = %path, "Listing directory");

        let call = Call::post("/list_dir").json(&PathRequest { path })?;
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let body = read_bytes(response, cancel).await?;

        let entries = decode_listing(&body)?;
        trace!(count = entries.len(), "Directory entries received");
        Ok(entries)
    }

    /// Metadata for a single path.
    pub async fn stat_file(&self, path: &str, cancel: &CancellationToken) -> Result<DirEntry> {
        debug!(path = %path, "Stat file");

        let call = Call::post("/stat_file").json(&PathRequest { path })?;
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let body = read_bytes(response, cancel).await?;

        decode_stat(&body)
    }

    async fn acknowledged(
        &self,
        call: Call,
        operation: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = self.transport.send(call, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let ack: Ack = read_json(response, operation, cancel).await?;
        ack.into_result(operation)
    }
}

/// Refuse paths that would address the whole filesystem.
fn ensure_deletable(path: &str) -> Result<()> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::InvalidArgument("refusing to delete an empty path".into()));
    }
    if trimmed.trim_matches('/').is_empty() {
        return Err(SandboxError::InvalidArgument(
            "refusing to delete the filesystem root".into(),
        ));
    }
    Ok(())
}

/// Error text the sandbox put in an `error` field, if any.
fn reported_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

/// Decode a directory listing in any of the shapes sandboxes have shipped:
///
/// 1. `{"entries": [{"name": .., "is_dir": .., ...}]}`
/// 2. `{"entries": ["name", ...]}`
/// 3. `["name", ...]`
///
/// Tried in that order; a structured listing only wins if it has entries and
/// every entry has a name.
pub(crate) fn decode_listing(body: &[u8]) -> Result<Vec<DirEntry>> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| SandboxError::decode("list_dir", e))?;

    if let Some(error) = reported_error(&value) {
        return Err(SandboxError::Remote(error));
    }

    if let Ok(listing) = StructuredListing::deserialize(&value) {
        if !listing.entries.is_empty() && listing.entries.iter().all(|e| !e.name.is_empty()) {
            return Ok(listing.entries);
        }
    }

    if let Ok(listing) = NameListing::deserialize(&value) {
        return Ok(listing.entries.iter().map(|n| DirEntry::from_name(n)).collect());
    }

    if let Ok(names) = Vec::<String>::deserialize(&value) {
        return Ok(names.iter().map(|n| DirEntry::from_name(n)).collect());
    }

    Err(SandboxError::decode(
        "list_dir",
        "response matched no known listing shape",
    ))
}

/// Decode a stat response: `{"entry": {...}}`, or the entry fields inline
/// (possibly next to `success`/`error`).
pub(crate) fn decode_stat(body: &[u8]) -> Result<DirEntry> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| SandboxError::decode("stat_file", e))?;

    if let Some(error) = reported_error(&value) {
        return Err(SandboxError::Remote(error));
    }

    if let Some(nested) = value.get("entry") {
        if let Ok(entry) = DirEntry::deserialize(nested) {
            if !entry.name.is_empty() {
                return Ok(entry);
            }
        }
    }

    if value.is_object() {
        if let Ok(entry) = DirEntry::deserialize(&value) {
            if !entry.name.is_empty() {
                return Ok(entry);
            }
        }
    }

    Err(SandboxError::decode(
        "stat_file",
        "response matched no known entry shape",
    ))
}
