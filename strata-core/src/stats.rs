//! Monotonic cache statistics.
//!
//! Counters are process-lifetime scoped and reset only on explicit request.
//! They exist for observability, not correctness: snapshots are taken
//! without locking the write path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live atomic counters owned by the orchestrator.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    deduplicated: AtomicU64,
    failures: AtomicU64,
    stale_fallbacks: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh entry was served from some tier.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// No fresh entry existed; the fetch operation ran and succeeded.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller attached to an already in-flight fetch.
    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// The fetch operation failed and no stale entry could stand in.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// The fetch operation failed but an expired entry was served instead.
    pub fn record_stale_fallback(&self) {
        self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters. Only called on explicit request.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.deduplicated.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.stale_fallbacks.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
    pub failures: u64,
    pub stale_fallbacks: u64,
}

impl StatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0) over hits and misses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
