//! Execution contexts and the ambient-context slot.
//!
//! An `ExecutionContext` accepts fire-and-forget work. The scheduler keeps the
//! "current" context in an explicit `AmbientContext` slot that is threaded
//! through collection and case runs, rather than in a process-wide global.
//!
//! ```text
//! AmbientContext ──install(dispatcher)──▶ ContextScope
//!        ▲                                    │
//!        └──────── restore previous on drop ──┘
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

/// A unit of posted work. Arguments are captured by the future itself.
pub type Work = BoxFuture<'static, ()>;

/// Something that can run posted work, now or later.
pub trait ExecutionContext: Send + Sync {
    /// Enqueue `work` for execution. Never blocks the caller.
    ///
    /// A context may drop `work` without polling it (for example after it has
    /// been disposed); callers that need to observe that use [`admit`].
    fn post(&self, work: Work);
}

/// Post `work` to `context` and wait for its output.
///
/// Returns `None` if the context dropped the work without running it to
/// completion.
pub async fn admit<F>(context: &dyn ExecutionContext, work: F) -> Option<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    context.post(
        async move {
            let output = work.await;
            // Receiver dropped means the waiter went away; nothing to report to.
            let _ = tx.send(output);
        }
        .boxed(),
    );
    rx.await.ok()
}

/// A place in a context's queue, taken now and filled with work later.
///
/// The reserved item holds whatever capacity the context admits it with
/// until the work arrives, so the work starts in the order the reservation
/// was made. Dropping an unfilled reservation gives that capacity back.
pub struct Reservation {
    slot: oneshot::Sender<Work>,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("open", &!self.slot.is_closed())
            .finish()
    }
}

impl Reservation {
    /// Queue a placeholder on `context`.
    pub fn reserve(context: &dyn ExecutionContext) -> Self {
        let (slot, filled) = oneshot::channel::<Work>();
        context.post(
            async move {
                if let Ok(work) = filled.await {
                    work.await;
                }
            }
            .boxed(),
        );
        Self { slot }
    }

    /// Run `work` in the reserved place and wait for its output.
    ///
    /// Returns `None` if the context dropped the placeholder, or the work,
    /// without running it to completion.
    pub async fn admit<F>(self, work: F) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let work = async move {
            let output = work.await;
            let _ = tx.send(output);
        }
        .boxed();
        if self.slot.send(work).is_err() {
            return None;
        }
        rx.await.ok()
    }
}

/// Shareable slot holding the current execution context, if any.
#[derive(Clone, Default)]
pub struct AmbientContext {
    current: Arc<Mutex<Option<Arc<dyn ExecutionContext>>>>,
}

impl std::fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientContext")
            .field("installed", &self.current().is_some())
            .finish()
    }
}

impl AmbientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already holds `context`.
    pub fn with_context(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            current: Arc::new(Mutex::new(Some(context))),
        }
    }

    /// The currently installed context.
    pub fn current(&self) -> Option<Arc<dyn ExecutionContext>> {
        self.lock().clone()
    }

    /// Install `context` until the returned scope is dropped.
    pub fn install(&self, context: Option<Arc<dyn ExecutionContext>>) -> ContextScope {
        let previous = std::mem::replace(&mut *self.lock(), context);
        ContextScope {
            slot: self.clone(),
            previous: Some(previous),
        }
    }

    /// Save the current context without changing it; the scope restores it
    /// on drop, undoing any nested `install` that was leaked.
    pub fn preserve(&self) -> ContextScope {
        let previous = self.current();
        ContextScope {
            slot: self.clone(),
            previous: Some(previous),
        }
    }

    /// True if both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &AmbientContext) -> bool {
        Arc::ptr_eq(&self.current, &other.current)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn ExecutionContext>>> {
        // The slot is a plain pointer swap; a poisoned lock still holds a valid value.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Restores the previously installed context exactly once.
#[must_use = "dropping the scope immediately restores the previous context"]
pub struct ContextScope {
    slot: AmbientContext,
    previous: Option<Option<Arc<dyn ExecutionContext>>>,
}

impl ContextScope {
    /// Restore the previous context now instead of at drop.
    pub fn restore(mut self) {
        self.restore_once();
    }

    fn restore_once(&mut self) {
        if let Some(previous) = self.previous.take() {
            let installed = previous.is_some();
            *self.slot.lock() = previous;
            tracing::trace!(installed, "ambient context restored");
        }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.restore_once();
    }
}

/// Runs posted work on the tokio runtime with no concurrency limit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnContext;

impl ExecutionContext for SpawnContext {
    fn post(&self, work: Work) {
        tokio::spawn(work);
    }
}
