//! RunSummary: the outcome triple every collection and every run produces.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// The outcome of running one case, one collection, or a whole run.
///
/// Summaries compose by componentwise addition, so a run's result is the
/// sum of its collections' results and a collection's result is the sum of
/// its cases'.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    /// Number of cases that ran (including failed and skipped ones).
    pub total: u64,
    /// Number of cases that failed.
    pub failed: u64,
    /// Number of cases that were skipped.
    pub skipped: u64,
}

impl RunSummary {
    /// Create a summary from raw counts.
    pub const fn new(total: u64, failed: u64, skipped: u64) -> Self {
        Self {
            total,
            failed,
            skipped,
        }
    }

    /// A single case that passed.
    pub const fn passed() -> Self {
        Self::new(1, 0, 0)
    }

    /// A single case that failed.
    pub const fn failure() -> Self {
        Self::new(1, 1, 0)
    }

    /// A single case that was skipped.
    pub const fn skip() -> Self {
        Self::new(1, 0, 1)
    }

    /// Number of cases that neither failed nor were skipped.
    pub fn passed_count(&self) -> u64 {
        self.total.saturating_sub(self.failed + self.skipped)
    }

    /// True if nothing failed.
    pub fn ok(&self) -> bool {
        self.failed == 0
    }

    /// True if no case contributed to this summary.
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.failed == 0 && self.skipped == 0
    }
}

impl Add for RunSummary {
    type Output = RunSummary;

    fn add(self, rhs: RunSummary) -> RunSummary {
        RunSummary {
            total: self.total + rhs.total,
            failed: self.failed + rhs.failed,
            skipped: self.skipped + rhs.skipped,
        }
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, rhs: RunSummary) {
        *self = *self + rhs;
    }
}

impl Sum for RunSummary {
    fn sum<I: Iterator<Item = RunSummary>>(iter: I) -> Self {
        iter.fold(RunSummary::default(), Add::add)
    }
}

impl<'a> Sum<&'a RunSummary> for RunSummary {
    fn sum<I: Iterator<Item = &'a RunSummary>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total: {}, failed: {}, skipped: {}",
            self.total, self.failed, self.skipped
        )
    }
}
