//! Diagnostic messages raised while a run is being set up or ordered.
//!
//! Orderer fallbacks are not failures of the run, but the person running the
//! suite needs to hear about them. The scheduler reports them to a
//! `MessageSink`; embedders either log them (`TracingSink`) or collect them
//! through a `DiagnosticStream`.
//!
//! ```text
//!   initialize ──┐
//!   collection ──┼──▶ DiagnosticStream (mpsc) ──▶ DiagnosticReceiver::drain()
//!   collection ──┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A human-readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub message: String,
}

impl DiagnosticMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Receives diagnostics from the scheduler. Must not block.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, message: DiagnosticMessage);
}

/// Logs every diagnostic at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn on_message(&self, message: DiagnosticMessage) {
        tracing::warn!(diagnostic = %message, "run diagnostic");
    }
}

/// Cloneable sending half of a diagnostic channel.
///
/// Sends never block. If the receiver has been dropped the message is
/// discarded.
#[derive(Clone, Debug)]
pub struct DiagnosticStream {
    sender: mpsc::UnboundedSender<DiagnosticMessage>,
}

/// Receiving half of a diagnostic channel.
#[derive(Debug)]
pub struct DiagnosticReceiver {
    receiver: mpsc::UnboundedReceiver<DiagnosticMessage>,
}

/// Create a connected stream/receiver pair.
pub fn diagnostic_stream() -> (DiagnosticStream, DiagnosticReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (DiagnosticStream { sender }, DiagnosticReceiver { receiver })
}

impl MessageSink for DiagnosticStream {
    fn on_message(&self, message: DiagnosticMessage) {
        let _ = self.sender.send(message);
    }
}

impl DiagnosticReceiver {
    /// Collect every pending message without waiting.
    pub fn drain(&mut self) -> Vec<DiagnosticMessage> {
        let mut messages = Vec::new();
        self.drain_each(|message| messages.push(message));
        messages
    }

    /// Hand each pending message to `f` without waiting.
    pub fn drain_each(&mut self, mut f: impl FnMut(DiagnosticMessage)) {
        while let Ok(message) = self.receiver.try_recv() {
            f(message);
        }
    }

    /// Wait for the next message. `None` once every stream handle is gone.
    pub async fn recv(&mut self) -> Option<DiagnosticMessage> {
        self.receiver.recv().await
    }
}
