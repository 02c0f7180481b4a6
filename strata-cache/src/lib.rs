//! STRATA Cache - Multi-Layer Cache Orchestration Engine
//!
//! A single `fetch` contract that transparently checks multiple storage
//! tiers, deduplicates concurrent identical requests across arbitrary
//! result types, enforces caller-supplied TTLs, falls back to stale data
//! when a live fetch fails, and supports exact-key and pattern-based
//! invalidation.
//!
//! # Tier chain
//!
//! ```text
//! fetch(key, ttl, operation)
//!     → MemoryTier (LRU, count+cost bounded, no I/O)
//!     → DiskTier (LMDB byte blobs)
//!     → SqliteTier (structured, date-queryable records)
//!     → Deduplicator (one in-flight fetch per key)
//!     → operation()
//! ```
//!
//! Hits promote forward into faster tiers; a failed operation falls back to
//! the first stale entry found in tier order. Tier-local failures (codec,
//! I/O) are logged and treated as misses: a cache is always allowed to
//! behave as if a given tier were simply empty.
//!
//! # Example
//!
//! ```ignore
//! let memory = Arc::new(MemoryTier::new(10_000, 64 * 1024 * 1024));
//! let disk = Arc::new(DiskTier::new("/var/cache/strata", 256)?);
//! let sqlite = Arc::new(SqliteTier::new("/var/lib/strata")?);
//! let cache = CacheOrchestrator::new(vec![memory, disk, sqlite]);
//!
//! let key = CacheKey::Activities { source: DataSource::Strava, days: 7 };
//! let activities: Vec<Activity> = cache
//!     .fetch(key, Duration::from_secs(300), || async { api.recent(7).await })
//!     .await?;
//! ```

pub mod codec;
pub mod dedup;
pub mod orchestrator;
pub mod tier;

pub use codec::EncodingBridge;
pub use dedup::{Deduplicator, InflightWaiter, Registration};
pub use orchestrator::CacheOrchestrator;
pub use tier::{CacheTier, DiskTier, MemoryTier, SqliteTier};

// Re-export the data model so callers depend on one crate.
pub use strata_core::{
    CacheConfig, CacheError, CacheKey, CacheResult, CacheStatistics, CacheValue, CachedEntry,
    CodecError, DataSource, RawEntry, ScoreKind, StatsSnapshot, SCHEMA_VERSION,
};
