//! Admission request priorities.

use std::ops::Range;

/// Number of independent rate-limit cells / wait queues.
pub const PRIORITY_COUNT: usize = 2;

/// Classifies a `use_` request for the purpose of rate limiting, wait
/// queue selection, and wakeup ordering.
///
/// Cells are tiered by index: a request at priority `p` must find budget
/// in its own cell *and every cell at a higher index* (lower priority).
/// This lets a tight limit on the lowest tier (compaction) implicitly
/// throttle everyone above it, while a limit on the highest tier (Tx)
/// affects only Tx traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Tx,
    Compaction,
    /// Only valid as an argument to configuration and bulk-accounting
    /// calls (`set_rate_limit`, `force_use`, `adjust`); never appears on
    /// a `use_` request, since it names no single wait queue.
    All,
}

impl Priority {
    /// Index into the per-priority cell/queue arrays. Panics on `All`,
    /// which names no single queue.
    pub fn index(self) -> usize {
        match self {
            Priority::Tx => 0,
            Priority::Compaction => 1,
            Priority::All => panic!("Priority::All has no single queue index"),
        }
    }

    /// Every cell a request at this priority must have budget in: this
    /// tier and all lower-priority tiers below it.
    ///
    /// `All` resolves to just the lowest tier (compaction): a rate
    /// configured there implicitly constrains every higher tier too, so
    /// there is no separate "every cell" case to express.
    pub fn applicable_cells(self) -> Range<usize> {
        match self {
            Priority::Tx => 0..PRIORITY_COUNT,
            Priority::Compaction => 1..PRIORITY_COUNT,
            Priority::All => 1..PRIORITY_COUNT,
        }
    }
}
