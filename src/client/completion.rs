//! One-shot handoff of a streaming command's exit status.
//!
//! The streaming call runs on its own task and fires its completion callback
//! from inside the read loop; a second code path waits for that status. The
//! sender is consumed by `complete`, so the status is written at most once,
//! and the waiter can only observe it after it has been written.

use tokio::sync::oneshot;

use crate::error::{Result, SandboxError};

/// Final status of a streamed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub code: i32,
    pub had_error: bool,
}

/// Create a linked sender/waiter pair.
pub fn channel() -> (CompletionSender, CompletionWaiter) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx }, CompletionWaiter { rx })
}

#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<Completion>,
}

impl CompletionSender {
    /// Record the final status and wake the waiter.
    pub fn complete(self, code: i32, had_error: bool) {
        // The waiter may already be gone; nothing left to notify then.
        let _ = self.tx.send(Completion { code, had_error });
    }
}

#[derive(Debug)]
pub struct CompletionWaiter {
    rx: oneshot::Receiver<Completion>,
}

impl CompletionWaiter {
    /// Wait for the completion status.
    ///
    /// Fails with [`SandboxError::StreamClosed`] if the sender was dropped
    /// without completing, i.e. the stream ended early or errored.
    pub async fn wait(self) -> Result<Completion> {
        self.rx.await.map_err(|_| SandboxError::StreamClosed)
    }
}
