//! Configuration for the cache engine.

use std::path::PathBuf;

/// Capacity limits and storage locations consumed from outside the engine.
///
/// TTLs are deliberately absent: they are caller-supplied per fetch, never
/// configured globally.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries the memory tier holds.
    pub memory_max_entries: usize,
    /// Cumulative cost ceiling (bytes) for the memory tier.
    pub memory_max_cost: u64,
    /// LMDB map size for the disk tier, in megabytes.
    pub disk_map_size_mb: usize,
    /// Directory holding the LMDB disk tier.
    pub disk_path: PathBuf,
    /// Directory holding the persistent store database file.
    pub store_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 10_000,
            memory_max_cost: 64 * 1024 * 1024,
            disk_map_size_mb: 256,
            disk_path: PathBuf::from("cache/lmdb"),
            store_path: PathBuf::from("cache/store"),
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier entry bound.
    pub fn with_memory_max_entries(mut self, max: usize) -> Self {
        self.memory_max_entries = max;
        self
    }

    /// Set the memory tier cost ceiling in bytes.
    pub fn with_memory_max_cost(mut self, max: u64) -> Self {
        self.memory_max_cost = max;
        self
    }

    /// Set the disk tier map size in megabytes.
    pub fn with_disk_map_size_mb(mut self, mb: usize) -> Self {
        self.disk_map_size_mb = mb;
        self
    }

    /// Set the disk tier directory.
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    /// Set the persistent store directory.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_memory_max_entries(500)
            .with_memory_max_cost(1024)
            .with_disk_map_size_mb(10)
            .with_disk_path("/tmp/lmdb")
            .with_store_path("/tmp/store");

        assert_eq!(config.memory_max_entries, 500);
        assert_eq!(config.memory_max_cost, 1024);
        assert_eq!(config.disk_map_size_mb, 10);
        assert_eq!(config.disk_path, PathBuf::from("/tmp/lmdb"));
        assert_eq!(config.store_path, PathBuf::from("/tmp/store"));
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.memory_max_entries > 0);
        assert!(config.memory_max_cost > 0);
        assert!(config.disk_map_size_mb > 0);
    }
}
