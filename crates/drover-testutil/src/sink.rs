//! Diagnostic sink that keeps everything it is given.

use std::sync::Mutex;

use drover_kernel::diagnostics::{DiagnosticMessage, MessageSink};

#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<DiagnosticMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<DiagnosticMessage> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.message.contains(needle))
    }
}

impl MessageSink for RecordingSink {
    fn on_message(&self, message: DiagnosticMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }
}
