//! drover-kernel: the scheduling core of drover.
//!
//! This crate provides:
//!
//! - **Gate**: Level-triggered completion latch
//! - **Tracker**: Counts fire-and-forget work and captures its first failure
//! - **Dispatcher**: FIFO queue with a hard concurrency cap
//! - **Context**: The `ExecutionContext` seam and the ambient-context slot
//! - **Ordering**: Case/collection orderers and their registry
//! - **Scheduler**: Runs collections sequentially or in parallel
//! - **Config**: Suite settings (TOML) layered with launch options

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod ordering;
pub mod scheduler;
pub mod tracker;

pub use config::{CollectionBehavior, ExecutionOptions, RunConfiguration, RunSettings};
pub use context::{
    AmbientContext, ContextScope, ExecutionContext, Reservation, SpawnContext, Work, admit,
};
pub use diagnostics::{
    DiagnosticMessage, DiagnosticReceiver, DiagnosticStream, MessageSink, TracingSink,
    diagnostic_stream,
};
pub use dispatcher::{BoundedDispatcher, normalize_max_concurrency};
pub use error::{OrdererError, OrdererKind, SchedulerError};
pub use gate::CompletionGate;
pub use ordering::{
    AlphabeticalOrderer, CaseOrderer, CollectionOrderer, DiscoveryOrderer, OrdererRef,
    OrdererRegistry,
};
pub use scheduler::{CaseContext, CaseExecutor, CollectionScheduler, RunPhase, run_all};
pub use tracker::{OperationFailure, OperationTracker};

// Re-exported so embedders don't need a direct dependency for the basics.
pub use drover_types::{Case, CaseId, Collection, CollectionId, CollectionPlan, RunSummary};
pub use tokio_util::sync::CancellationToken;
