//! Collection scheduling.
//!
//! A run is a list of collections, each an ordered list of cases. Cases in a
//! collection always run one after another. Collections run either one at a
//! time or concurrently, with every case body and every piece of tracked
//! work admitted through one `BoundedDispatcher`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CollectionScheduler::run_all               │
//! │  initialize: resolve orderers, build dispatcher             │
//! │  install dispatcher into AmbientContext                     │
//! │                                                             │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │   │ collection 1 │  │ collection 2 │  │ collection 3 │ task │
//! │   │ case ▸ case  │  │ case ▸ case  │  │ case ▸ case  │      │
//! │   │ drain()      │  │ drain()      │  │ drain()      │      │
//! │   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘      │
//! │          └───── case bodies + tracked work ──┘              │
//! │                         ▼                                   │
//! │             BoundedDispatcher (FIFO, cap K)                 │
//! │                                                             │
//! │  finalize: restore AmbientContext, shut dispatcher down     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collection bodies themselves never hold a dispatcher slot, so a
//! collection waiting for its tracker to drain cannot starve the work it is
//! waiting on.

mod collection_run;
mod executor;
mod runner;

use std::sync::Arc;

use drover_types::{CollectionPlan, RunSummary};
use tokio_util::sync::CancellationToken;

use crate::config::RunConfiguration;
use crate::error::SchedulerError;

pub use executor::{CaseContext, CaseExecutor};
pub use runner::{CollectionScheduler, RunPhase};

/// Run `plans` with a fresh scheduler that logs its diagnostics.
pub async fn run_all(
    executor: Arc<dyn CaseExecutor>,
    plans: Vec<CollectionPlan>,
    configuration: RunConfiguration,
    cancel: CancellationToken,
) -> Result<RunSummary, SchedulerError> {
    CollectionScheduler::new(executor)
        .run_all(plans, configuration, cancel)
        .await
}
