//! Cached entries and the freshness law.
//!
//! An entry stores no TTL: the same key may be fetched with different TTLs
//! by different callers over time, so freshness is a pure function of the
//! entry's write timestamp, the caller-supplied TTL, and "now".

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for payload types the cache can hold.
///
/// Values must round-trip through the encoding bridge and be cloneable so
/// that a single in-flight fetch can hand its result to every waiter.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A cached value together with its write timestamp and storage cost.
///
/// The value is opaque to the cache. Entries are replaced whole, never
/// partially updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry<V> {
    /// The cached payload.
    pub value: V,
    /// When this entry was written (or originally fetched, for promotions).
    pub written_at: DateTime<Utc>,
    /// Storage cost in bytes, used for cost-bounded eviction.
    pub cost: u64,
}

/// Byte-form entry, the common currency of every tier.
pub type RawEntry = CachedEntry<Vec<u8>>;

impl<V> CachedEntry<V> {
    /// Create an entry written now.
    pub fn new(value: V, cost: u64) -> Self {
        Self {
            value,
            written_at: Utc::now(),
            cost,
        }
    }

    /// Create an entry with an explicit write timestamp.
    ///
    /// Promotions between tiers use this to preserve the original write
    /// time, so copying a value into a faster tier never resets its age.
    pub fn with_written_at(value: V, written_at: DateTime<Utc>, cost: u64) -> Self {
        Self {
            value,
            written_at,
            cost,
        }
    }

    /// Freshness law: an entry is fresh iff its age is strictly below `ttl`.
    ///
    /// A value written at time T and re-requested at T+d with ttl=L is
    /// served from cache iff d < L.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }

    /// Age of this entry as of `now`. Clock skew clamps to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Re-wrap the payload, preserving timestamp and cost.
    pub fn map<U, F>(self, f: F) -> CachedEntry<U>
    where
        F: FnOnce(V) -> U,
    {
        CachedEntry {
            value: f(self.value),
            written_at: self.written_at,
            cost: self.cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_below_ttl() {
        let entry = CachedEntry::new("x", 1);
        let now = entry.written_at + chrono::Duration::seconds(30);
        assert!(entry.is_fresh(Duration::from_secs(60), now));
    }

    #[test]
    fn test_stale_at_exact_ttl() {
        // d == L is stale: the law is strict.
        let entry = CachedEntry::new("x", 1);
        let now = entry.written_at + chrono::Duration::seconds(60);
        assert!(!entry.is_fresh(Duration::from_secs(60), now));
    }

    #[test]
    fn test_stale_past_ttl() {
        let entry = CachedEntry::new("x", 1);
        let now = entry.written_at + chrono::Duration::seconds(120);
        assert!(!entry.is_fresh(Duration::from_secs(60), now));
    }

    #[test]
    fn test_age_clamps_on_clock_skew() {
        let entry = CachedEntry::new("x", 1);
        let past = entry.written_at - chrono::Duration::seconds(10);
        assert_eq!(entry.age(past), Duration::ZERO);
        assert!(entry.is_fresh(Duration::from_secs(1), past));
    }

    #[test]
    fn test_map_preserves_metadata() {
        let entry = CachedEntry::new(41i32, 8);
        let written_at = entry.written_at;
        let mapped = entry.map(|v| (v + 1).to_string());
        assert_eq!(mapped.value, "42");
        assert_eq!(mapped.written_at, written_at);
        assert_eq!(mapped.cost, 8);
    }
}
