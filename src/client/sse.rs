//! Server-Sent Events decoding.
//!
//! The parser is push-based: bytes are fed in as they arrive off the wire and
//! complete events are handed to a handler. The handler decides whether to
//! keep reading (`ControlFlow::Continue`) or stop (`ControlFlow::Break`), and
//! any error it returns aborts decoding immediately.

use std::ops::ControlFlow;

use reqwest::Response;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Result, SandboxError};

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Event name (`output`, `complete`, `error`, ...). Empty if the server
    /// sent data without an `event:` line.
    pub name: String,
    /// Data fragments joined with `\n`.
    pub data: String,
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    /// Bytes of an incomplete line carried over between chunks.
    pending: Vec<u8>,
    /// Prefix of `pending` already searched for a line break.
    scanned: usize,
    name: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, dispatching every event it completes.
    ///
    /// Bytes already known to hold no line break are not scanned again, so a
    /// long line arriving in many small chunks costs linear time.
    pub fn feed<F>(&mut self, chunk: &[u8], handler: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(StreamEvent) -> Result<ControlFlow<()>>,
    {
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        let mut search_from = self.scanned;
        let mut outcome = Ok(ControlFlow::Continue(()));

        while let Some(offset) = self.pending[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let line = String::from_utf8_lossy(&self.pending[consumed..end]).into_owned();
            consumed = end + 1;
            search_from = consumed;

            match self.process_line(&line, handler) {
                Ok(ControlFlow::Continue(())) => {}
                stop => {
                    outcome = stop;
                    break;
                }
            }
        }

        self.pending.drain(..consumed);
        // After an early stop the remainder may still hold complete lines.
        self.scanned = if matches!(outcome, Ok(ControlFlow::Continue(()))) {
            self.pending.len()
        } else {
            0
        };
        outcome
    }

    /// Flush state at end of stream: an unterminated final line and any event
    /// the server did not close with a blank line.
    pub fn finish<F>(mut self, handler: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(StreamEvent) -> Result<ControlFlow<()>>,
    {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            if self.process_line(&line, handler)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        self.dispatch(handler)
    }

    fn process_line<F>(&mut self, line: &str, handler: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(StreamEvent) -> Result<ControlFlow<()>>,
    {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch(handler);
        }

        if line.starts_with(':') {
            // comment
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.trim().to_string());
        } else if line.starts_with("id:") || line.starts_with("retry:") {
            // valid framing, unused here
        } else {
            trace!(line = %line, "Ignoring unrecognized SSE line");
        }

        Ok(ControlFlow::Continue(()))
    }

    fn dispatch<F>(&mut self, handler: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(StreamEvent) -> Result<ControlFlow<()>>,
    {
        if self.name.is_none() && self.data.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        let event = StreamEvent {
            name: self.name.take().unwrap_or_default(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        trace!(event = %event.name, data_len = event.data.len(), "SSE event");
        handler(event)
    }
}

/// Decode a complete in-memory event stream.
pub fn parse_events(input: &[u8]) -> Result<Vec<StreamEvent>> {
    let mut events = Vec::new();
    let mut collect = |event: StreamEvent| {
        events.push(event);
        Ok(ControlFlow::Continue(()))
    };

    let mut parser = EventStreamParser::new();
    if parser.feed(input, &mut collect)?.is_continue() {
        let _flow = parser.finish(&mut collect)?;
    }
    Ok(events)
}

/// Read a streaming response body to its end (or until the handler breaks),
/// dispatching events as they complete.
///
/// Returning drops the response, which closes the connection; this is how
/// cancellation and early termination release the server side.
pub(crate) async fn consume<F>(
    mut response: Response,
    cancel: &CancellationToken,
    mut handler: F,
) -> Result<ControlFlow<()>>
where
    F: FnMut(StreamEvent) -> Result<ControlFlow<()>>,
{
    let mut parser = EventStreamParser::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            chunk = response.chunk() => chunk?,
        };

        match chunk {
            Some(bytes) => {
                if parser.feed(&bytes, &mut handler)?.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            None => return parser.finish(&mut handler),
        }
    }
}
