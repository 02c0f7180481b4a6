//! In-process memory tier with LRU eviction.
//!
//! Bounded by both entry count and cumulative cost; exceeding either bound
//! evicts least-recently-used entries until the tier is under both limits
//! again. All operations are O(1) amortized and perform no I/O.
//!
//! Recency is tracked with a logical-clock queue: each touch pushes a
//! `(key, sequence)` pair and records the sequence on the entry. Stale
//! queue pairs ("ghosts") left behind by later touches are detected by
//! sequence comparison and skipped during eviction, which keeps every
//! operation O(1) amortized instead of requiring a queue scan on touch.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;
use strata_core::{CacheError, CacheKey, CacheResult, RawEntry};
use tracing::trace;

use super::CacheTier;

struct Slot {
    entry: RawEntry,
    touch: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    lru_order: VecDeque<(String, u64)>,
    total_cost: u64,
    next_seq: u64,
    evictions: u64,
}

/// Ghost pairs tolerated per live entry before the queue is compacted.
const LRU_ORDER_SLACK: usize = 2;

impl Inner {
    fn touch(&mut self, rendered: &str) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(slot) = self.entries.get_mut(rendered) {
            slot.touch = seq;
            self.lru_order.push_back((rendered.to_string(), seq));
        }
        // Reads also push pairs, so the queue must be re-bounded even when
        // eviction never runs.
        if self.lru_order.len() > self.entries.len() * LRU_ORDER_SLACK + 16 {
            self.compact();
        }
    }

    /// Drop ghost pairs, keeping one live pair per entry in LRU order.
    fn compact(&mut self) {
        let entries = &self.entries;
        self.lru_order
            .retain(|(key, seq)| matches!(entries.get(key), Some(slot) if slot.touch == *seq));
    }

    fn remove(&mut self, rendered: &str) -> bool {
        match self.entries.remove(rendered) {
            Some(slot) => {
                self.total_cost = self.total_cost.saturating_sub(slot.entry.cost);
                true
            }
            None => false,
        }
    }

    /// Evict LRU entries until under both bounds, skipping ghost pairs.
    ///
    /// A single entry whose cost alone exceeds the cost ceiling is kept:
    /// evicting it would make every oversized key permanently uncacheable
    /// while freeing memory nothing else is waiting for.
    fn evict_to_bounds(&mut self, max_entries: usize, max_cost: u64) {
        while self.entries.len() > max_entries
            || (self.total_cost > max_cost && self.entries.len() > 1)
        {
            let Some((key, seq)) = self.lru_order.pop_front() else {
                break;
            };
            let live = matches!(self.entries.get(&key), Some(slot) if slot.touch == seq);
            if live {
                self.remove(&key);
                self.evictions += 1;
                trace!(key = %key, "memory tier evicted LRU entry");
            }
        }
    }
}

/// Fast, capacity-bounded, cost-bounded in-process store.
pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_cost: u64,
}

impl MemoryTier {
    /// Create a memory tier bounded by `max_entries` and `max_cost` bytes.
    pub fn new(max_entries: usize, max_cost: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
            max_cost,
        }
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CacheError::TierIo {
            tier: "memory",
            reason: "lock poisoned".to_string(),
        })
    }

    /// Number of capacity-driven evictions so far.
    pub fn evictions(&self) -> u64 {
        self.inner.lock().map(|inner| inner.evictions).unwrap_or(0)
    }

    /// Current cumulative cost of stored entries, in bytes.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().map(|inner| inner.total_cost).unwrap_or(0)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<RawEntry>> {
        let rendered = key.render();
        let mut inner = self.lock()?;
        let entry = match inner.entries.get(&rendered) {
            Some(slot) => slot.entry.clone(),
            None => return Ok(None),
        };
        inner.touch(&rendered);
        Ok(Some(entry))
    }

    async fn set(&self, key: &CacheKey, entry: RawEntry) -> CacheResult<()> {
        let rendered = key.render();
        let mut inner = self.lock()?;
        inner.remove(&rendered);
        inner.total_cost += entry.cost;
        inner.entries.insert(rendered.clone(), Slot { entry, touch: 0 });
        inner.touch(&rendered);
        inner.evict_to_bounds(self.max_entries, self.max_cost);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let rendered = key.render();
        self.lock()?.remove(&rendered);
        Ok(())
    }

    async fn remove_matching(&self, pattern: &Regex) -> CacheResult<u64> {
        let mut inner = self.lock()?;
        let matching: Vec<String> = inner
            .entries
            .keys()
            .filter(|rendered| pattern.is_match(rendered))
            .cloned()
            .collect();
        let mut removed = 0u64;
        for rendered in &matching {
            if inner.remove(rendered) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn remove_all(&self) -> CacheResult<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.lru_order.clear();
        inner.total_cost = 0;
        Ok(())
    }

    async fn len(&self) -> CacheResult<u64> {
        Ok(self.lock()?.entries.len() as u64)
    }
}
