//! Run-wide progress counters.
//!
//! Each counter is independent; `processed == success + failure + skipped`
//! holds once every unit has recorded both its outcome and its completion.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub struct ProgressTracker {
    total: i64,
    processed: AtomicI64,
    success: AtomicI64,
    failure: AtomicI64,
    skipped: AtomicI64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub total: i64,
    pub processed: i64,
    pub success: i64,
    pub failure: i64,
    pub skipped: i64,
}

impl ProgressSnapshot {
    pub fn remaining(&self) -> i64 {
        self.total - self.processed
    }
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total: i64::try_from(total).unwrap_or(i64::MAX),
            processed: AtomicI64::new(0),
            success: AtomicI64::new(0),
            failure: AtomicI64::new(0),
            skipped: AtomicI64::new(0),
        }
    }

    /// Each increment returns the new value.
    pub fn increment_processed(&self) -> i64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_success(&self) -> i64 {
        self.success.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_failure(&self) -> i64 {
        self.failure.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_skipped(&self) -> i64 {
        self.skipped.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn processed(&self) -> i64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// `total - processed`; negative when more units ran than declared.
    pub fn remaining(&self) -> i64 {
        self.total - self.processed()
    }

    pub fn success_count(&self) -> i64 {
        self.success.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> i64 {
        self.failure.load(Ordering::SeqCst)
    }

    pub fn skipped_count(&self) -> i64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            processed: self.processed(),
            success: self.success_count(),
            failure: self.failure_count(),
            skipped: self.skipped_count(),
        }
    }
}
