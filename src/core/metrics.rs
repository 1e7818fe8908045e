//! Per-strategy call counters
//!
//! Every strategy instance owns one `CallMetrics`; counters are lock-free and
//! cover all owners of that instance.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Call coordination metrics
#[derive(Debug, Default)]
pub struct CallMetrics {
    /// Total number of calls made through the strategy
    pub calls: AtomicU64,
    /// Number of times the underlying operation was actually invoked
    pub executions: AtomicU64,
    /// Calls answered by an existing in-flight or stored outcome
    pub joined: AtomicU64,
    /// Attempts cancelled because a newer call arrived
    pub superseded: AtomicU64,
    /// Results dropped because they were stale at settlement
    pub discarded: AtomicU64,
    /// Executions that settled with an error
    pub failed: AtomicU64,
    /// Invalidation requests served
    pub invalidations: AtomicU64,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.executions.store(0, Ordering::Relaxed);
        self.joined.store(0, Ordering::Relaxed);
        self.superseded.store(0, Ordering::Relaxed);
        self.discarded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub executions: u64,
    pub joined: u64,
    pub superseded: u64,
    pub discarded: u64,
    pub failed: u64,
    pub invalidations: u64,
}

impl MetricsSnapshot {
    /// Fraction of calls that did not trigger their own execution (0.0 to 1.0)
    pub fn reuse_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.joined as f64 / self.calls as f64
        }
    }
}
