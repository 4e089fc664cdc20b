//! The case-execution seam.

use std::future::Future;

use async_trait::async_trait;
use drover_types::{Case, CollectionId, RunSummary};
use tokio_util::sync::CancellationToken;

use crate::tracker::OperationTracker;

/// Everything a case body may touch while it runs.
#[derive(Clone, Debug)]
pub struct CaseContext {
    collection: CollectionId,
    tracker: OperationTracker,
    cancel: CancellationToken,
}

impl CaseContext {
    pub fn new(
        collection: CollectionId,
        tracker: OperationTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collection,
            tracker,
            cancel,
        }
    }

    /// The collection the case belongs to.
    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    /// The collection's operation tracker.
    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Start fire-and-forget work that must finish before the collection
    /// does. A failure is counted against the collection, not this case.
    pub fn dispatch<F>(&self, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tracker.dispatch(work);
    }

    /// The run's cancellation token. Cases may observe it cooperatively.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs one case and reports its counts.
///
/// Case failures belong in the returned summary. A panic is contained by the
/// scheduler and counted as one failed case.
#[async_trait]
pub trait CaseExecutor: Send + Sync {
    async fn execute(&self, case: &Case, context: &CaseContext) -> RunSummary;
}

#[async_trait]
impl<F, Fut> CaseExecutor for F
where
    F: Fn(Case, CaseContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunSummary> + Send + 'static,
{
    async fn execute(&self, case: &Case, context: &CaseContext) -> RunSummary {
        (self)(case.clone(), context.clone()).await
    }
}
