//! Pool accounting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared by a pool and its contexts.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    borrowed: AtomicUsize,
    completed: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    faults: AtomicU64,
    settling: AtomicUsize,
}

impl PoolStats {
    pub(crate) fn borrowed_one(&self) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn returned_one(&self) {
        self.borrowed.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn settling_started(&self) {
        self.settling.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn settling_finished(&self) {
        self.settling.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, capacity: usize, available: usize) -> PoolMetrics {
        PoolMetrics {
            capacity,
            available,
            borrowed: self.borrowed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            settling: self.settling.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Number of contexts the pool was built with.
    pub capacity: usize,
    /// Contexts waiting in the pool.
    pub available: usize,
    /// Contexts lent out, including those waiting for a background call.
    pub borrowed: usize,
    /// Guest calls that ran to completion, successfully or not.
    pub completed: u64,
    /// Calls that exceeded their timeout.
    pub timeouts: u64,
    /// Calls abandoned because the caller cancelled.
    pub cancellations: u64,
    /// Calls or callbacks that panicked.
    pub faults: u64,
    /// Abandoned calls still running in the background.
    pub settling: usize,
}

impl PoolMetrics {
    /// Contexts accounted for, borrowed or idle. Equals `capacity` on an
    /// open pool.
    #[must_use]
    pub fn accounted(&self) -> usize {
        self.available + self.borrowed
    }
}
