//! `CollectionScheduler` runs every collection of a suite.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use drover_types::{CollectionId, CollectionPlan, RunSummary};
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfiguration;
use crate::context::{AmbientContext, ExecutionContext, Reservation};
use crate::diagnostics::{MessageSink, TracingSink};
use crate::dispatcher::BoundedDispatcher;
use crate::error::SchedulerError;
use crate::ordering::{self, CaseOrderer, CollectionOrderer, DiscoveryOrderer, OrdererRegistry};
use crate::tracker::panic_message;

use super::collection_run::CollectionRun;
use super::executor::CaseExecutor;

/// Where a scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    NotInitialized,
    Initializing,
    Running,
    Finalizing,
    Done,
}

/// Orderers resolved once at initialization and shared by every collection.
struct ResolvedRun {
    configuration: RunConfiguration,
    case_orderer: Arc<dyn CaseOrderer>,
    collection_orderer: Arc<dyn CollectionOrderer>,
}

/// Runs a suite's collections, sequentially or with bounded parallelism.
///
/// A scheduler runs one suite at a time. It can be reused once a run has
/// finished.
pub struct CollectionScheduler {
    executor: Arc<dyn CaseExecutor>,
    sink: Arc<dyn MessageSink>,
    orderers: OrdererRegistry,
    ambient: AmbientContext,
    phase: Mutex<RunPhase>,
}

impl std::fmt::Debug for CollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("orderers", &self.orderers)
            .field("ambient", &self.ambient)
            .field("phase", &self.phase())
            .finish()
    }
}

impl CollectionScheduler {
    /// Create a scheduler that logs diagnostics and uses the built-in
    /// orderers.
    pub fn new(executor: Arc<dyn CaseExecutor>) -> Self {
        Self {
            executor,
            sink: Arc::new(TracingSink),
            orderers: OrdererRegistry::default(),
            ambient: AmbientContext::new(),
            phase: Mutex::new(RunPhase::NotInitialized),
        }
    }

    /// Report diagnostics to `sink` instead of the log.
    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resolve orderer names against `orderers`.
    pub fn with_orderers(mut self, orderers: OrdererRegistry) -> Self {
        self.orderers = orderers;
        self
    }

    /// Share an ambient-context slot with the embedder. Whatever the slot
    /// holds before a run is restored when the run finishes.
    pub fn with_ambient_context(mut self, ambient: AmbientContext) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn ambient_context(&self) -> &AmbientContext {
        &self.ambient
    }

    pub fn phase(&self) -> RunPhase {
        *self.lock_phase()
    }

    /// Run every collection in `plans` and return the aggregate summary.
    ///
    /// Case failures are counted, never returned as errors. Cancelling
    /// `cancel` stops new collections and new cases from starting; work that
    /// has already started, including tracked tails, runs to completion.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(collections = plans.len(), environment = %configuration.describe())
    )]
    pub async fn run_all(
        &self,
        plans: Vec<CollectionPlan>,
        configuration: RunConfiguration,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        let _lifecycle = self.begin()?;

        let run = self.initialize(configuration);

        let dispatcher = (!run.configuration.parallelization_disabled)
            .then(|| Arc::new(BoundedDispatcher::new(run.configuration.max_concurrency)));
        let _teardown = DisposeOnDrop(dispatcher.clone());
        let scope = match &dispatcher {
            Some(dispatcher) => self
                .ambient
                .install(Some(dispatcher.clone() as Arc<dyn ExecutionContext>)),
            None => self.ambient.preserve(),
        };

        self.set_phase(RunPhase::Running);
        let outcome = match &dispatcher {
            Some(dispatcher) => self.run_parallel(&run, plans, dispatcher, &cancel).await,
            None => self.run_sequential(&run, plans, &cancel).await,
        };

        self.set_phase(RunPhase::Finalizing);
        scope.restore();
        if let Some(dispatcher) = &dispatcher {
            dispatcher.shutdown().await;
        }

        match &outcome {
            Ok(summary) => tracing::info!(%summary, "run finished"),
            Err(err) => tracing::error!(error = %err, "run aborted"),
        }
        outcome
    }

    fn begin(&self) -> Result<Lifecycle<'_>, SchedulerError> {
        let mut phase = self.lock_phase();
        match *phase {
            RunPhase::NotInitialized | RunPhase::Done => {
                *phase = RunPhase::Initializing;
                tracing::debug!(phase = ?RunPhase::Initializing, "run phase");
                Ok(Lifecycle { scheduler: self })
            }
            current => Err(SchedulerError::AlreadyRunning { phase: current }),
        }
    }

    fn initialize(&self, configuration: RunConfiguration) -> ResolvedRun {
        let case_orderer: Arc<dyn CaseOrderer> = match &configuration.case_orderer {
            None => Arc::new(DiscoveryOrderer),
            Some(name) => self.orderers.resolve_case_orderer(name).unwrap_or_else(|err| {
                ordering::report(self.sink.as_ref(), &err);
                Arc::new(DiscoveryOrderer) as Arc<dyn CaseOrderer>
            }),
        };
        let collection_orderer: Arc<dyn CollectionOrderer> =
            match &configuration.collection_orderer {
                None => Arc::new(DiscoveryOrderer),
                Some(name) => self
                    .orderers
                    .resolve_collection_orderer(name)
                    .unwrap_or_else(|err| {
                        ordering::report(self.sink.as_ref(), &err);
                        Arc::new(DiscoveryOrderer) as Arc<dyn CollectionOrderer>
                    }),
            };

        tracing::debug!(
            case_orderer = case_orderer.name(),
            collection_orderer = collection_orderer.name(),
            "run initialized"
        );
        ResolvedRun {
            configuration,
            case_orderer,
            collection_orderer,
        }
    }

    async fn run_sequential(
        &self,
        run: &ResolvedRun,
        plans: Vec<CollectionPlan>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        let mut total = RunSummary::default();
        for plan in self.order_plans(run, plans) {
            if cancel.is_cancelled() {
                tracing::info!("cancellation requested; not starting remaining collections");
                break;
            }
            let collection = plan.collection.id.clone();
            let body = self
                .collection_run(run, plan, self.ambient.current(), cancel)
                .run();
            let outcome = AssertUnwindSafe(body).catch_unwind().await;
            match outcome {
                Ok(summary) => total += summary,
                Err(payload) => {
                    return Err(SchedulerError::CollectionPanicked {
                        collection: collection.to_string(),
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        }
        Ok(total)
    }

    async fn run_parallel(
        &self,
        run: &ResolvedRun,
        plans: Vec<CollectionPlan>,
        dispatcher: &Arc<BoundedDispatcher>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        // Collection bodies are plain tasks; only case bodies and tracked
        // work take dispatcher slots, so a collection waiting on its own
        // drain never starves the work it is waiting for. Each collection's
        // first case reserves its queue position here, so collections start
        // in orderer order whatever order their tasks are polled in.
        let mut pending = JoinSet::new();
        for plan in self.order_plans(run, plans) {
            if cancel.is_cancelled() {
                tracing::info!("cancellation requested; not starting remaining collections");
                break;
            }
            let collection = plan.collection.id.clone();
            let outer = Some(dispatcher.clone() as Arc<dyn ExecutionContext>);
            let mut collection_run = self.collection_run(run, plan, outer, cancel);
            if !collection_run.plan.cases.is_empty() {
                collection_run.first_slot = Some(Reservation::reserve(dispatcher.as_ref()));
            }
            let body = collection_run.run();
            pending.spawn(async move {
                let outcome = AssertUnwindSafe(body).catch_unwind().await;
                (collection, outcome.map_err(|payload| panic_message(payload.as_ref())))
            });
        }

        let mut total = RunSummary::default();
        let mut defect = None;
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(summary))) => total += summary,
                Ok((collection, Err(message))) => {
                    tracing::error!(%collection, %message, "collection orchestration panicked");
                    if defect.is_none() {
                        defect = Some(SchedulerError::CollectionPanicked {
                            collection: collection.to_string(),
                            message,
                        });
                    }
                }
                Err(err) if err.is_cancelled() => {
                    tracing::debug!("collection task cancelled before completion");
                }
                Err(err) => {
                    tracing::error!(error = %err, "collection task failed");
                    if defect.is_none() {
                        defect = Some(SchedulerError::CollectionPanicked {
                            collection: "<unknown>".to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        match defect {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }

    /// Apply the collection orderer and rebuild the plan list in that order.
    fn order_plans(&self, run: &ResolvedRun, plans: Vec<CollectionPlan>) -> Vec<CollectionPlan> {
        let collections = plans.iter().map(|plan| plan.collection.clone()).collect();
        let ordered = ordering::order_collections(
            run.collection_orderer.as_ref(),
            collections,
            self.sink.as_ref(),
        );

        let mut by_id: HashMap<CollectionId, VecDeque<CollectionPlan>> = HashMap::new();
        for plan in plans {
            by_id
                .entry(plan.collection.id.clone())
                .or_default()
                .push_back(plan);
        }
        // Ordering preserved membership, so every id is present.
        ordered
            .iter()
            .filter_map(|collection| by_id.get_mut(&collection.id)?.pop_front())
            .collect()
    }

    fn collection_run(
        &self,
        run: &ResolvedRun,
        plan: CollectionPlan,
        outer: Option<Arc<dyn ExecutionContext>>,
        cancel: &CancellationToken,
    ) -> CollectionRun {
        CollectionRun {
            plan,
            executor: self.executor.clone(),
            case_orderer: run.case_orderer.clone(),
            sink: self.sink.clone(),
            outer,
            first_slot: None,
            cancel: cancel.clone(),
        }
    }

    fn set_phase(&self, next: RunPhase) {
        *self.lock_phase() = next;
        tracing::debug!(phase = ?next, "run phase");
    }

    fn lock_phase(&self) -> MutexGuard<'_, RunPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the run `Done` however `run_all` exits, including when its future
/// is dropped mid-run.
struct Lifecycle<'a> {
    scheduler: &'a CollectionScheduler,
}

impl Drop for Lifecycle<'_> {
    fn drop(&mut self) {
        self.scheduler.set_phase(RunPhase::Done);
    }
}

/// Disposes the run's dispatcher if `run_all` exits without reaching
/// `shutdown`. Queued work may hold trackers that point back at the
/// dispatcher, so the queue has to be cleared explicitly.
struct DisposeOnDrop(Option<Arc<BoundedDispatcher>>);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        if let Some(dispatcher) = &self.0 {
            dispatcher.dispose();
        }
    }
}
