//! The cache orchestrator: one fetch contract over all tiers.
//!
//! Tier lookup order is fixed, fastest first; promotion always writes
//! forward (slower tier to faster tier), never backward. The orchestrator
//! is constructed explicitly and passed to callers; it owns the only write
//! path into the tiers.
//!
//! # Error policy
//!
//! Codec and tier-I/O failures are logged and treated as misses: a cache
//! is always allowed to behave as if a given tier were simply empty. Only
//! an upstream operation failure without a stale fallback, or a
//! deduplication type mismatch, ever reaches the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use strata_core::{
    CacheConfig, CacheKey, CacheResult, CacheStatistics, CacheValue, RawEntry, StatsSnapshot,
};
use tracing::{debug, warn};

use crate::codec::EncodingBridge;
use crate::dedup::{Deduplicator, Registration};
use crate::tier::{CacheTier, DiskTier, MemoryTier, SqliteTier};

/// Public entry point composing all tiers and deduplication.
pub struct CacheOrchestrator {
    /// Fallback chain, fastest first.
    tiers: Vec<Arc<dyn CacheTier>>,
    dedup: Deduplicator,
    stats: CacheStatistics,
}

impl CacheOrchestrator {
    /// Create an orchestrator over the given tier chain, fastest first.
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>) -> Self {
        Self {
            tiers,
            dedup: Deduplicator::new(),
            stats: CacheStatistics::new(),
        }
    }

    /// Build the standard memory / disk / persistent-store chain from
    /// `config`, opening the backing stores.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let memory = MemoryTier::new(config.memory_max_entries, config.memory_max_cost);
        let disk = DiskTier::new(&config.disk_path, config.disk_map_size_mb)?;
        let store = SqliteTier::new(&config.store_path)?;
        Ok(Self::new(vec![
            Arc::new(memory),
            Arc::new(disk),
            Arc::new(store),
        ]))
    }

    /// Fetch the value for `key`, consulting tiers, the in-flight registry,
    /// and finally the caller-supplied `operation`.
    ///
    /// - A tier entry younger than `ttl` is a hit: it is promoted into
    ///   faster tiers and returned without invoking `operation`.
    /// - On a full miss, at most one `operation` runs per key at a time;
    ///   concurrent callers share its result, or its error.
    /// - If `operation` fails and any tier still holds an entry for `key`
    ///   (regardless of age), that stale value is returned instead of the
    ///   error.
    pub async fn fetch<V, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        operation: F,
    ) -> CacheResult<V>
    where
        V: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        let now = Utc::now();

        // Tier scan, fastest first. The first FRESH entry wins; timestamps
        // are never compared across tiers.
        for (index, tier) in self.tiers.iter().enumerate() {
            let entry = match tier.get(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %key, tier = tier.name(), error = %err, "tier read failed, skipping");
                    continue;
                }
            };
            if !entry.is_fresh(ttl, now) {
                continue;
            }
            match EncodingBridge::decode::<V>(&entry.value) {
                Ok(value) => {
                    debug!(key = %key, tier = tier.name(), "cache hit");
                    self.promote(&key, &entry, index).await;
                    self.stats.record_hit();
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key = %key, tier = tier.name(), error = %err, "undecodable entry, treating as miss");
                }
            }
        }

        // Full miss: share an already in-flight fetch if there is one.
        if let Some(waiter) = self.dedup.attach::<V>(&key).await? {
            debug!(key = %key, "attached to in-flight fetch");
            self.stats.record_deduplicated();
            return waiter.wait().await;
        }

        // Register atomically; a concurrent registration between the
        // attach above and here demotes us to follower.
        let waiter = match self.dedup.register(&key, operation()).await? {
            Registration::Follower(waiter) => {
                debug!(key = %key, "lost registration race, following");
                self.stats.record_deduplicated();
                return waiter.wait().await;
            }
            Registration::Leader(waiter) => waiter,
        };

        match waiter.wait().await {
            Ok(value) => {
                self.store_all(&key, &value).await;
                self.stats.record_miss();
                Ok(value)
            }
            Err(err) => {
                if let Some(stale) = self.stale_lookup::<V>(&key).await {
                    warn!(key = %key, error = %err, "fetch failed, serving stale entry");
                    self.stats.record_stale_fallback();
                    Ok(stale)
                } else {
                    warn!(key = %key, error = %err, "fetch failed with no stale fallback");
                    self.stats.record_failure();
                    Err(err)
                }
            }
        }
    }

    /// Copy a hit from `tiers[found_at]` into every faster tier,
    /// preserving the original write timestamp.
    async fn promote(&self, key: &CacheKey, entry: &RawEntry, found_at: usize) {
        for tier in &self.tiers[..found_at] {
            if let Err(err) = tier.set(key, entry.clone()).await {
                warn!(key = %key, tier = tier.name(), error = %err, "promotion write failed");
            }
        }
    }

    /// Store a freshly fetched value into every tier.
    async fn store_all<V: CacheValue>(&self, key: &CacheKey, value: &V) {
        let payload = match EncodingBridge::encode(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %key, error = %err, "could not encode value for caching");
                return;
            }
        };
        let cost = payload.len() as u64;
        let entry = RawEntry::new(payload, cost);
        for tier in &self.tiers {
            if let Err(err) = tier.set(key, entry.clone()).await {
                warn!(key = %key, tier = tier.name(), error = %err, "tier write failed");
            }
        }
    }

    /// First decodable entry for `key` across tiers, ignoring freshness.
    async fn stale_lookup<V: CacheValue>(&self, key: &CacheKey) -> Option<V> {
        for tier in &self.tiers {
            let entry = match tier.get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(_) => continue,
            };
            if let Ok(value) = EncodingBridge::decode::<V>(&entry.value) {
                return Some(value);
            }
        }
        None
    }

    /// Remove `key` from every tier.
    pub async fn invalidate(&self, key: &CacheKey) {
        for tier in &self.tiers {
            if let Err(err) = tier.remove(key).await {
                warn!(key = %key, tier = tier.name(), error = %err, "invalidation failed");
            }
        }
    }

    /// Remove all keys matching `pattern` from every tier.
    ///
    /// Returns the total number of entries removed across tiers.
    pub async fn invalidate_matching(&self, pattern: &Regex) -> u64 {
        let mut removed = 0u64;
        for tier in &self.tiers {
            match tier.remove_matching(pattern).await {
                Ok(count) => removed += count,
                Err(err) => {
                    warn!(tier = tier.name(), error = %err, "pattern invalidation failed");
                }
            }
        }
        removed
    }

    /// Clear every tier.
    pub async fn invalidate_all(&self) {
        for tier in &self.tiers {
            if let Err(err) = tier.remove_all().await {
                warn!(tier = tier.name(), error = %err, "full invalidation failed");
            }
        }
    }

    /// Point-in-time statistics snapshot; never locks the write path.
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero all statistics counters.
    pub fn reset_statistics(&self) {
        self.stats.reset()
    }
}
