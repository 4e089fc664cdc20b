//! Level-triggered completion gate.
//!
//! A reusable latch with two states. Waiters block while the gate is closed
//! and are all released when it opens. Awaiting does not consume the open
//! state, so any number of callers can pass an open gate.
//!
//! ```text
//!   reset() ──▶ [closed] ──▶ await_open() suspends
//!   signal() ─▶ [open]   ──▶ all waiters released, later waiters pass
//! ```

use tokio::sync::watch;

/// Reusable open/closed latch. Starts open.
#[derive(Debug)]
pub struct CompletionGate {
    state: watch::Sender<bool>,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGate {
    /// Create an open gate.
    pub fn new() -> Self {
        let (state, _receiver) = watch::channel(true);
        Self { state }
    }

    /// Open the gate, releasing every current and future waiter until the
    /// next `reset()`. Idempotent.
    pub fn signal(&self) {
        self.state.send_if_modified(|open| !std::mem::replace(open, true));
    }

    /// Close the gate. Subsequent waiters block until `signal()`.
    pub fn reset(&self) {
        self.state.send_if_modified(|open| std::mem::replace(open, false));
    }

    /// Snapshot of the current state.
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Suspend until the gate is open.
    pub async fn await_open(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|open| *open).await;
    }
}
