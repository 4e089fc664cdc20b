//! Concurrency probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct ProbeState {
    current: AtomicUsize,
    max: AtomicUsize,
    entered: AtomicUsize,
}

/// Counts overlapping holders and remembers the high-water mark.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    state: Arc<ProbeState>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one holder active until the guard drops.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max.fetch_max(now, Ordering::SeqCst);
        self.state.entered.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            state: self.state.clone(),
        }
    }

    /// Holders active right now.
    pub fn current(&self) -> usize {
        self.state.current.load(Ordering::SeqCst)
    }

    /// Most holders ever active at once.
    pub fn max(&self) -> usize {
        self.state.max.load(Ordering::SeqCst)
    }

    /// Total number of `enter` calls.
    pub fn entered(&self) -> usize {
        self.state.entered.load(Ordering::SeqCst)
    }
}

/// Active holder of a `ConcurrencyProbe`.
#[derive(Debug)]
pub struct ProbeGuard {
    state: Arc<ProbeState>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.state.current.fetch_sub(1, Ordering::SeqCst);
    }
}
