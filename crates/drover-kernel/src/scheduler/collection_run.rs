//! Running one collection: order its cases, run them one after another,
//! then drain the collection's tracker before reporting.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use drover_types::{Case, CollectionPlan, RunSummary};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::{self, ExecutionContext, Reservation};
use crate::diagnostics::MessageSink;
use crate::ordering::{self, CaseOrderer};
use crate::tracker::{OperationTracker, panic_message};

use super::executor::{CaseContext, CaseExecutor};

/// One collection's worth of work, ready to run.
pub(crate) struct CollectionRun {
    pub(crate) plan: CollectionPlan,
    pub(crate) executor: Arc<dyn CaseExecutor>,
    pub(crate) case_orderer: Arc<dyn CaseOrderer>,
    pub(crate) sink: Arc<dyn MessageSink>,
    /// Where case bodies and tracked work are admitted; `None` runs case
    /// bodies inline and spawns tracked work on the runtime.
    pub(crate) outer: Option<Arc<dyn ExecutionContext>>,
    /// Queue position taken for the first case body when the run was
    /// scheduled; later cases queue behind whatever was posted since.
    pub(crate) first_slot: Option<Reservation>,
    pub(crate) cancel: CancellationToken,
}

impl CollectionRun {
    pub(crate) async fn run(self) -> RunSummary {
        let span = tracing::debug_span!(
            "collection",
            collection = %self.plan.collection.id,
            cases = self.plan.cases.len(),
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> RunSummary {
        if self.cancel.is_cancelled() {
            tracing::debug!("cancelled before start");
            return RunSummary::default();
        }

        let CollectionRun {
            plan,
            executor,
            case_orderer,
            sink,
            outer,
            mut first_slot,
            cancel,
        } = self;

        let tracker = OperationTracker::new(outer.clone());
        let cases = ordering::order_cases(
            case_orderer.as_ref(),
            &plan.collection,
            plan.cases,
            sink.as_ref(),
        );

        let mut summary = RunSummary::default();
        let mut remaining = cases.len();
        for case in cases {
            if cancel.is_cancelled() {
                tracing::debug!(remaining, "cancellation observed; not starting remaining cases");
                break;
            }
            remaining -= 1;
            let context =
                CaseContext::new(plan.collection.id.clone(), tracker.clone(), cancel.clone());
            let admission = match (first_slot.take(), outer.as_deref()) {
                (Some(reserved), _) => Admission::Reserved(reserved),
                (None, Some(outer)) => Admission::Post(outer),
                (None, None) => Admission::Inline(&tracker),
            };
            summary += run_case(executor.clone(), case, context, admission).await;
        }
        // An unused reservation holds a slot that tracked work may need.
        drop(first_slot);

        // Tracked work started by the cases must finish before the collection
        // reports, cancelled or not.
        if let Some(failure) = tracker.drain().await {
            tracing::error!(error = %failure, "tracked work failed");
            summary += RunSummary::failure();
        }

        tracing::debug!(%summary, "collection finished");
        summary
    }
}

/// How a case body gets to run.
enum Admission<'a> {
    Reserved(Reservation),
    Post(&'a dyn ExecutionContext),
    Inline(&'a OperationTracker),
}

async fn run_case(
    executor: Arc<dyn CaseExecutor>,
    case: Case,
    context: CaseContext,
    admission: Admission<'_>,
) -> RunSummary {
    let name = case.display_name.clone();
    let body = async move {
        AssertUnwindSafe(executor.execute(&case, &context))
            .catch_unwind()
            .await
    };

    let outcome = match admission {
        Admission::Reserved(reserved) => reserved.admit(body).await,
        Admission::Post(outer) => context::admit(outer, body).await,
        Admission::Inline(tracker) => Some(tracker.run_synchronously(body).await),
    };
    let Some(outcome) = outcome else {
        tracing::debug!(case = %name, "case dropped before it could run");
        return RunSummary::default();
    };

    match outcome {
        Ok(summary) => summary,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(case = %name, %message, "case executor panicked");
            RunSummary::failure()
        }
    }
}
