//! Test fixtures for drover.
//!
//! - `ScriptedExecutor`: a `CaseExecutor` whose cases pass, fail, skip,
//!   panic, sleep, or leave tracked work behind, per script
//! - `ConcurrencyProbe`: records how many case bodies/tails overlapped
//! - `EventLog`: ordered record of case and tail start/finish events
//! - `RecordingSink`: collects diagnostics for assertions

pub mod executor;
pub mod probe;
pub mod sink;

pub use executor::{CaseOutcome, CaseScript, Event, EventLog, ScriptedExecutor, TailScript};
pub use probe::{ConcurrencyProbe, ProbeGuard};
pub use sink::RecordingSink;

use drover_types::CollectionPlan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// Build plans from `(collection, [case, ...])` pairs.
pub fn plans(pairs: &[(&str, &[&str])]) -> Vec<CollectionPlan> {
    pairs
        .iter()
        .map(|(collection, cases)| CollectionPlan::named(collection, cases))
        .collect()
}
