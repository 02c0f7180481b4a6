//! Storage tiers and the uniform tier contract.
//!
//! Every tier speaks the same byte-oriented contract so the orchestrator
//! can walk the chain fastest-first without knowing what backs each tier.

pub mod disk;
pub mod memory;
pub mod sqlite;

pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use sqlite::SqliteTier;

use async_trait::async_trait;
use regex::Regex;
use strata_core::{CacheKey, CacheResult, RawEntry};

/// One storage backend in the fallback chain.
///
/// Tiers store [`RawEntry`] values (encoded payload + write timestamp +
/// cost) keyed by the rendered form of a [`CacheKey`]. All tiers are
/// mutated only through the orchestrator; no other component writes them
/// directly.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short name for log attribution.
    fn name(&self) -> &'static str;

    /// Look up an entry. `Ok(None)` on absence; errors are tier-local.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<RawEntry>>;

    /// Store an entry, replacing any previous value whole.
    async fn set(&self, key: &CacheKey, entry: RawEntry) -> CacheResult<()>;

    /// Remove an entry by exact key.
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Remove all entries whose rendered key matches `pattern`.
    ///
    /// Returns the number of entries removed. Matching is over the same
    /// rendered string in every tier, so invalidation behaves identically
    /// regardless of which tier currently holds a value.
    async fn remove_matching(&self, pattern: &Regex) -> CacheResult<u64>;

    /// Remove every entry.
    async fn remove_all(&self) -> CacheResult<()>;

    /// Number of entries currently stored.
    async fn len(&self) -> CacheResult<u64>;
}
