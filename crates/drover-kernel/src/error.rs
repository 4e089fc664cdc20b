//! Error types for scheduling and ordering.
//!
//! Case failures are never errors here: they are counted in the
//! `RunSummary`. These types cover misuse of the scheduler, orchestration
//! defects, and orderer problems (which are reported as diagnostics and
//! then recovered from).

use thiserror::Error;

use crate::scheduler::RunPhase;

/// Errors returned by `CollectionScheduler::run_all`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a run is already in progress (phase: {phase:?})")]
    AlreadyRunning { phase: RunPhase },

    #[error("collection '{collection}' orchestration panicked: {message}")]
    CollectionPanicked { collection: String, message: String },
}

/// Problems resolving or applying a case/collection orderer.
#[derive(Debug, Error)]
pub enum OrdererError {
    #[error("Could not find {kind} orderer '{name}'")]
    NotFound { kind: OrdererKind, name: String },

    #[error("{kind} orderer '{name}' threw during construction: {source:#}")]
    Construction {
        kind: OrdererKind,
        name: String,
        source: anyhow::Error,
    },

    #[error("{kind} orderer '{name}' failed while ordering {target}: {source:#}")]
    Ordering {
        kind: OrdererKind,
        name: String,
        target: String,
        source: anyhow::Error,
    },

    #[error("{kind} orderer '{name}' panicked while ordering {target}: {message}")]
    Panicked {
        kind: OrdererKind,
        name: String,
        target: String,
        message: String,
    },

    #[error(
        "{kind} orderer '{name}' changed the members of {target} (expected {expected} items, got {actual})"
    )]
    MembershipChanged {
        kind: OrdererKind,
        name: String,
        target: String,
        expected: usize,
        actual: usize,
    },
}

/// Which kind of orderer an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdererKind {
    Case,
    Collection,
}

impl std::fmt::Display for OrdererKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrdererKind::Case => f.write_str("case"),
            OrdererKind::Collection => f.write_str("collection"),
        }
    }
}
