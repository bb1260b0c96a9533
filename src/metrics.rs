//! Operation counters for the admin core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector shared across services.
#[derive(Debug, Clone, Default)]
pub struct AdminMetrics {
    /// Route-cache hits.
    pub cache_hits: Arc<AtomicU64>,
    /// Route-cache misses.
    pub cache_misses: Arc<AtomicU64>,
    /// Permission rules added through assignment.
    pub policy_rules_added: Arc<AtomicU64>,
    /// Permission rules removed through assignment.
    pub policy_rules_removed: Arc<AtomicU64>,
    /// Compensating rollbacks attempted after a failed add.
    pub rollbacks_attempted: Arc<AtomicU64>,
    /// Compensating rollbacks that themselves failed.
    pub rollbacks_failed: Arc<AtomicU64>,
    /// Scheduler registration/deregistration failures tolerated.
    pub scheduler_desyncs: Arc<AtomicU64>,
    /// Execution log rows written or updated.
    pub executions_recorded: Arc<AtomicU64>,
}

impl AdminMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rules_added(&self, count: usize) {
        self.policy_rules_added
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rules_removed(&self, count: usize) {
        self.policy_rules_removed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rollback_attempted(&self) {
        self.rollbacks_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback_failed(&self) {
        self.rollbacks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduler_desync(&self) {
        self.scheduler_desyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            policy_rules_added: self.policy_rules_added.load(Ordering::Relaxed),
            policy_rules_removed: self.policy_rules_removed.load(Ordering::Relaxed),
            rollbacks_attempted: self.rollbacks_attempted.load(Ordering::Relaxed),
            rollbacks_failed: self.rollbacks_failed.load(Ordering::Relaxed),
            scheduler_desyncs: self.scheduler_desyncs.load(Ordering::Relaxed),
            executions_recorded: self.executions_recorded.load(Ordering::Relaxed),
        }
    }
}

/// Plain-data view of [`AdminMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub policy_rules_added: u64,
    pub policy_rules_removed: u64,
    pub rollbacks_attempted: u64,
    pub rollbacks_failed: u64,
    pub scheduler_desyncs: u64,
    pub executions_recorded: u64,
}

impl MetricsSnapshot {
    /// Cache hit rate in percent, 0.0 when no lookups were recorded.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / total as f64) * 100.0
    }
}
