//! STRATA Core - Data Model for the Multi-Layer Cache Engine
//!
//! Defines the types shared by every cache tier and the orchestrator:
//! cache keys, cached entries with their freshness law, the error taxonomy,
//! statistics counters, and configuration. This crate performs no I/O.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod stats;

pub use config::CacheConfig;
pub use entry::{CacheValue, CachedEntry, RawEntry};
pub use error::{CacheError, CacheResult, CodecError};
pub use key::{CacheKey, DataSource, ScoreKind};
pub use stats::{CacheStatistics, StatsSnapshot};

/// Version of the persisted record encoding.
///
/// Disk-backed tiers compare this against the version they recorded at their
/// last open and clear themselves unconditionally on mismatch. Cache content
/// is always re-derivable from the caller-supplied fetch operation, so a
/// full clear is the only migration strategy.
pub const SCHEMA_VERSION: u32 = 1;
