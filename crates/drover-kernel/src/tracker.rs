//! Async operation tracker: counts outstanding fire-and-forget work.
//!
//! Case bodies can post work that outlives their own call stack. The tracker
//! counts every posted operation, captures the first failure any of them
//! produces, and lets the collection runner wait until the count drains to
//! zero before it reports the collection finished.
//!
//! ```text
//!   dispatch(work) ──▶ operation_started()  (0→1 closes the gate)
//!        │
//!        ▼ outer context or tokio::spawn
//!   work runs ──▶ failure? capture (earliest start wins)
//!        │
//!        ▼ drop guard
//!   operation_completed()  (1→0 opens the gate) ──▶ drain() returns
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::gate::CompletionGate;

/// A failure captured from tracked work.
#[derive(Debug, Error)]
pub enum OperationFailure {
    #[error("{0:#}")]
    Error(anyhow::Error),
    #[error("operation panicked: {0}")]
    Panicked(String),
}

struct TrackerState {
    outstanding: usize,
    /// Start order of the next dispatched operation.
    next_sequence: u64,
    /// Captured failure and the start order of the operation that produced it.
    failure: Option<(u64, Arc<OperationFailure>)>,
}

struct TrackerShared {
    /// Counter and captured failure; the gate is updated while this is held.
    state: Mutex<TrackerState>,
    gate: CompletionGate,
    outer: Option<Arc<dyn ExecutionContext>>,
}

/// Handle to a shared operation tracker. Clones observe the same count.
#[derive(Clone)]
pub struct OperationTracker {
    shared: Arc<TrackerShared>,
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("OperationTracker")
            .field("outstanding", &state.outstanding)
            .field("failed", &state.failure.is_some())
            .field("forwarding", &self.shared.outer.is_some())
            .finish()
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OperationTracker {
    /// Create a tracker that forwards dispatched work to `outer`, or spawns
    /// it on the runtime when `outer` is `None`.
    pub fn new(outer: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                state: Mutex::new(TrackerState {
                    outstanding: 0,
                    next_sequence: 0,
                    failure: None,
                }),
                gate: CompletionGate::new(),
                outer,
            }),
        }
    }

    /// Register one outstanding operation.
    pub fn operation_started(&self) {
        self.begin_operation();
    }

    /// Register an operation and hand out its place in start order.
    fn begin_operation(&self) -> u64 {
        let mut state = self.lock_state();
        state.outstanding = state
            .outstanding
            .checked_add(1)
            .expect("operation tracker count overflowed");
        if state.outstanding == 1 {
            self.shared.gate.reset();
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        sequence
    }

    /// Retire one outstanding operation.
    ///
    /// # Panics
    ///
    /// Panics if there is no matching `operation_started()`.
    pub fn operation_completed(&self) {
        let mut state = self.lock_state();
        if state.outstanding == 0 {
            drop(state);
            panic!("operation_completed called without a matching operation_started");
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.shared.gate.signal();
        }
    }

    /// Post `work` as a tracked fire-and-forget operation.
    ///
    /// Errors and panics from `work` are captured for `drain()` and never
    /// reach the caller. When several operations fail, the one dispatched
    /// earliest is kept, whatever order they finish in. The operation is
    /// retired when `work` finishes or when it is dropped without running.
    pub fn dispatch<F>(&self, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let sequence = self.begin_operation();
        let guard = OperationGuard {
            tracker: self.clone(),
        };
        let tracker = self.clone();
        let tracked = async move {
            let _guard = guard;
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracker.capture(sequence, OperationFailure::Error(err)),
                Err(payload) => tracker.capture(
                    sequence,
                    OperationFailure::Panicked(panic_message(payload.as_ref())),
                ),
            }
        }
        .boxed();

        let outer = self.shared.outer.clone();
        let queued = std::panic::catch_unwind(AssertUnwindSafe(move || match outer {
            Some(outer) => outer.post(tracked),
            None => {
                tokio::spawn(tracked);
            }
        }));
        if let Err(payload) = queued {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "failed to queue tracked operation");
            self.capture(
                sequence,
                OperationFailure::Panicked(format!("failed to queue operation: {message}")),
            );
        }
    }

    /// Run `work` on the caller's path without forwarding.
    ///
    /// Unlike `dispatch`, the output (including any error) goes straight
    /// back to the caller.
    pub async fn run_synchronously<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        work.await
    }

    /// Wait until every outstanding operation has finished, then return the
    /// failure of the earliest-started operation that failed, if any.
    pub async fn drain(&self) -> Option<Arc<OperationFailure>> {
        self.shared.gate.await_open().await;
        self.failure()
    }

    /// Number of operations currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.lock_state().outstanding
    }

    /// The earliest-started failure captured so far, without waiting.
    pub fn failure(&self) -> Option<Arc<OperationFailure>> {
        self.lock_state()
            .failure
            .as_ref()
            .map(|(_, failure)| failure.clone())
    }

    fn capture(&self, sequence: u64, failure: OperationFailure) {
        let mut state = self.lock_state();
        match &state.failure {
            Some((kept, _)) if *kept < sequence => {
                tracing::debug!(error = %failure, sequence, "discarding later-started tracked failure");
            }
            _ => {
                tracing::debug!(error = %failure, sequence, "captured tracked failure");
                state.failure = Some((sequence, Arc::new(failure)));
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Retires one operation when dropped.
struct OperationGuard {
    tracker: OperationTracker,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.tracker.operation_completed();
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
