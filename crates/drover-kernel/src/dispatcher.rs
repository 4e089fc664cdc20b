//! Bounded dispatcher: FIFO work queue with a hard concurrency cap.
//!
//! ```text
//!   post(work) ──▶ running < max ? ──yes──▶ spawn worker(work)
//!                       │ no
//!                       ▼
//!               [VecDeque<Work>] ◀── worker finishes: pop_front, run in same slot
//!                                    queue empty: running -= 1, worker exits
//! ```
//!
//! Running count and queue live under one `std::sync::Mutex`; critical
//! sections are a counter bump or a `VecDeque` push/pop. Workers are tokio
//! tasks owned by a `TaskTracker` so teardown can wait for admitted work.
//! Queued items are never dropped while the lock is held: dropping work can
//! run arbitrary destructors, including ones that re-enter the dispatcher.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio_util::task::TaskTracker;

use crate::context::{ExecutionContext, Work};
use crate::tracker::panic_message;

/// Resolve a configured concurrency limit; `<= 0` means one slot per
/// available hardware thread.
pub fn normalize_max_concurrency(requested: i32) -> usize {
    match usize::try_from(requested) {
        Ok(limit) if limit > 0 => limit,
        _ => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

struct DispatchState {
    running: usize,
    queue: VecDeque<Work>,
    disposed: bool,
}

struct DispatcherShared {
    max_concurrency: usize,
    state: Mutex<DispatchState>,
    workers: TaskTracker,
}

impl DispatcherShared {
    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Completion hook: hand the slot to the next queued item, or give it up.
    fn finish_one(&self) -> Option<Work> {
        let mut state = self.lock_state();
        if !state.disposed
            && let Some(next) = state.queue.pop_front()
        {
            return Some(next);
        }
        state.running -= 1;
        None
    }

    /// Give back a slot whose worker never started.
    fn release_slot(&self) {
        let mut state = self.lock_state();
        state.running -= 1;
    }
}

/// Holds an admitted slot until its worker is spawned; released on drop
/// otherwise, so a failed spawn cannot leak it.
struct PendingWorker<'a> {
    shared: &'a DispatcherShared,
    spawned: bool,
}

impl Drop for PendingWorker<'_> {
    fn drop(&mut self) {
        if !self.spawned {
            self.shared.release_slot();
        }
    }
}

/// Admits at most `max_concurrency` posted items at a time, in arrival order.
pub struct BoundedDispatcher {
    shared: Arc<DispatcherShared>,
}

impl std::fmt::Debug for BoundedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("BoundedDispatcher")
            .field("max_concurrency", &self.shared.max_concurrency)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl BoundedDispatcher {
    /// Create a dispatcher. `max_concurrency <= 0` is normalized to the
    /// number of available hardware threads.
    pub fn new(max_concurrency: i32) -> Self {
        let max_concurrency = normalize_max_concurrency(max_concurrency);
        tracing::debug!(max_concurrency, "bounded dispatcher created");
        Self {
            shared: Arc::new(DispatcherShared {
                max_concurrency,
                state: Mutex::new(DispatchState {
                    running: 0,
                    queue: VecDeque::new(),
                    disposed: false,
                }),
                workers: TaskTracker::new(),
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Number of items currently admitted.
    pub fn running(&self) -> usize {
        self.shared.lock_state().running
    }

    /// Number of items waiting for a slot.
    pub fn queued(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock_state().disposed
    }

    /// Enqueue `work`. Starts it now if a slot is free, otherwise queues it
    /// behind everything posted earlier. Never blocks.
    ///
    /// Work posted after disposal is dropped without running.
    pub fn post(&self, work: Work) {
        let admitted = {
            let mut state = self.shared.lock_state();
            if state.disposed {
                None
            } else if state.running < self.shared.max_concurrency {
                state.running += 1;
                // A free slot with a non-empty queue is left behind by a
                // failed spawn; older work still goes first.
                if state.queue.is_empty() {
                    Some(work)
                } else {
                    state.queue.push_back(work);
                    state.queue.pop_front()
                }
            } else {
                state.queue.push_back(work);
                return;
            }
        };

        match admitted {
            Some(work) => self.spawn_worker(work),
            None => tracing::trace!("dispatcher disposed; dropping posted work"),
        }
    }

    /// Run `work` on the caller's path, bypassing the queue and the cap.
    pub async fn run_synchronously<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        work.await
    }

    /// Stop admitting work and drop everything still queued. Admitted work
    /// keeps running to completion.
    pub fn dispose(&self) {
        let dropped = {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.queue)
        };
        self.shared.workers.close();
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "dispatcher disposed with queued work");
        }
        drop(dropped);
    }

    /// Dispose, then wait for every admitted item to finish.
    pub async fn shutdown(&self) {
        self.dispose();
        self.shared.workers.wait().await;
    }

    /// Panics if there is no runtime to spawn on; the slot is released
    /// first and `first` is dropped unrun.
    fn spawn_worker(&self, first: Work) {
        let mut pending = PendingWorker {
            shared: &self.shared,
            spawned: false,
        };
        let shared = self.shared.clone();
        self.shared.workers.spawn(async move {
            let mut next = Some(first);
            while let Some(work) = next {
                if let Err(payload) = AssertUnwindSafe(work).catch_unwind().await {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(%message, "dispatched work panicked");
                }
                next = shared.finish_one();
            }
        });
        pending.spawned = true;
    }
}

impl ExecutionContext for BoundedDispatcher {
    fn post(&self, work: Work) {
        BoundedDispatcher::post(self, work);
    }
}

impl Drop for BoundedDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}
