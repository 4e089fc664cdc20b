//! Scripted case executor.
//!
//! Cases are scripted by display name; unscripted cases use the default
//! script (pass immediately).
//!
//! ```ignore
//! let executor = ScriptedExecutor::new()
//!     .default_script(CaseScript::pass().after(Duration::from_millis(5)))
//!     .script("flaky", CaseScript::fail())
//!     .script("leaky", CaseScript::pass().with_tail(TailScript::failing(Duration::ZERO)));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use drover_kernel::CancellationToken;
use drover_kernel::scheduler::{CaseContext, CaseExecutor};
use drover_types::{Case, CollectionId, RunSummary};

use crate::probe::ConcurrencyProbe;

/// How a scripted case ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseOutcome {
    #[default]
    Pass,
    Fail,
    Skip,
    Panic,
}

/// Tracked work a case leaves behind.
#[derive(Debug, Clone, Default)]
pub struct TailScript {
    pub delay: Duration,
    pub fails: bool,
}

impl TailScript {
    pub fn ok(delay: Duration) -> Self {
        Self {
            delay,
            fails: false,
        }
    }

    pub fn failing(delay: Duration) -> Self {
        Self { delay, fails: true }
    }
}

/// What one case does.
#[derive(Debug, Clone, Default)]
pub struct CaseScript {
    pub outcome: CaseOutcome,
    pub delay: Duration,
    pub tail: Option<TailScript>,
    /// Cancelled when the case body finishes.
    pub cancels: Option<CancellationToken>,
}

impl CaseScript {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn fail() -> Self {
        Self {
            outcome: CaseOutcome::Fail,
            ..Self::default()
        }
    }

    pub fn skip() -> Self {
        Self {
            outcome: CaseOutcome::Skip,
            ..Self::default()
        }
    }

    pub fn panic() -> Self {
        Self {
            outcome: CaseOutcome::Panic,
            ..Self::default()
        }
    }

    /// Sleep for `delay` before finishing.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tail(mut self, tail: TailScript) -> Self {
        self.tail = Some(tail);
        self
    }

    /// Cancel `token` when this case finishes.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancels = Some(token);
        self
    }
}

/// Something observable a case or tail did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CaseStarted { collection: CollectionId, case: String },
    CaseFinished { collection: CollectionId, case: String },
    TailFinished { collection: CollectionId, case: String },
}

impl Event {
    pub fn collection(&self) -> &CollectionId {
        match self {
            Event::CaseStarted { collection, .. }
            | Event::CaseFinished { collection, .. }
            | Event::TailFinished { collection, .. } => collection,
        }
    }
}

/// Shared, ordered event record.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Names of cases that started, in start order.
    pub fn started(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                Event::CaseStarted { case, .. } => Some(case),
                _ => None,
            })
            .collect()
    }

    /// Index of the first event matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.snapshot().iter().position(predicate)
    }

    /// Index of the last event matching `predicate`.
    pub fn last_position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.snapshot().iter().rposition(predicate)
    }
}

/// A `CaseExecutor` driven by per-case scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, CaseScript>,
    default: CaseScript,
    probe: ConcurrencyProbe,
    events: EventLog,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script used for cases without their own script.
    pub fn default_script(mut self, script: CaseScript) -> Self {
        self.default = script;
        self
    }

    /// Script the case named `case`.
    pub fn script(mut self, case: &str, script: CaseScript) -> Self {
        self.scripts.insert(case.to_string(), script);
        self
    }

    pub fn probe(&self) -> &ConcurrencyProbe {
        &self.probe
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn script_for(&self, case: &Case) -> &CaseScript {
        self.scripts.get(&case.display_name).unwrap_or(&self.default)
    }
}

#[async_trait]
impl CaseExecutor for ScriptedExecutor {
    async fn execute(&self, case: &Case, context: &CaseContext) -> RunSummary {
        let script = self.script_for(case).clone();
        let collection = context.collection().clone();
        let name = case.display_name.clone();

        let slot = self.probe.enter();
        self.events.record(Event::CaseStarted {
            collection: collection.clone(),
            case: name.clone(),
        });

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        if let Some(tail) = script.tail {
            let probe = self.probe.clone();
            let events = self.events.clone();
            let collection = collection.clone();
            let name = name.clone();
            context.dispatch(async move {
                let _slot = probe.enter();
                tokio::time::sleep(tail.delay).await;
                events.record(Event::TailFinished {
                    collection,
                    case: name.clone(),
                });
                if tail.fails {
                    anyhow::bail!("tail of '{name}' failed");
                }
                Ok(())
            });
        }

        self.events.record(Event::CaseFinished {
            collection,
            case: name.clone(),
        });
        drop(slot);

        if let Some(token) = script.cancels {
            token.cancel();
        }

        match script.outcome {
            CaseOutcome::Pass => RunSummary::passed(),
            CaseOutcome::Fail => RunSummary::failure(),
            CaseOutcome::Skip => RunSummary::skip(),
            CaseOutcome::Panic => panic!("scripted panic in '{name}'"),
        }
    }
}
