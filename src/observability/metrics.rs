//! Engine metrics
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; readers may see slightly stale totals

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    schemas_composed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_invalidations: AtomicU64,
    validations_accepted: AtomicU64,
    validations_rejected: AtomicU64,
    version_conflicts: AtomicU64,
    breaking_changes_blocked: AtomicU64,
    evolution_records: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_schemas_composed(&self) {
        self.schemas_composed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_invalidations(&self) {
        self.cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_validations_accepted(&self) {
        self.validations_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_validations_rejected(&self) {
        self.validations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_version_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_breaking_changes_blocked(&self) {
        self.breaking_changes_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_evolution_records(&self) {
        self.evolution_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            schemas_composed: self.schemas_composed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
            validations_accepted: self.validations_accepted.load(Ordering::Relaxed),
            validations_rejected: self.validations_rejected.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            breaking_changes_blocked: self.breaking_changes_blocked.load(Ordering::Relaxed),
            evolution_records: self.evolution_records.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub schemas_composed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_invalidations: u64,
    pub validations_accepted: u64,
    pub validations_rejected: u64,
    pub version_conflicts: u64,
    pub breaking_changes_blocked: u64,
    pub evolution_records: u64,
}

impl MetricsSnapshot {
    /// Fraction of schema lookups served from cache
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
