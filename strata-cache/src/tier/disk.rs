//! LMDB-backed disk tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped
//! key-value store for small-to-medium byte blobs. Keys are the rendered
//! cache-key strings; values use the persisted record layout from
//! [`EncodingBridge`].
//!
//! # Schema versioning
//!
//! The tier stores the schema version under a reserved meta key. At open,
//! a stored version that differs from [`SCHEMA_VERSION`] clears the whole
//! database before any read; cache content is re-derivable, so this is the
//! only migration strategy.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use regex::Regex;
use strata_core::{CacheError, CacheKey, CacheResult, RawEntry, SCHEMA_VERSION};
use tracing::{debug, warn};

use super::CacheTier;
use crate::codec::EncodingBridge;

/// Reserved meta key. Starts with a NUL byte so it can never collide with
/// a rendered cache key.
const META_SCHEMA_KEY: &[u8] = b"\x00schema_version";

fn io_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::TierIo {
        tier: "disk",
        reason: e.to_string(),
    }
}

/// Byte-oriented persistent store, slower and larger than memory.
pub struct DiskTier {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl DiskTier {
    /// Open (or create) the disk tier at `path` with the given map size.
    pub fn new<P: AsRef<Path>>(path: P, map_size_mb: usize) -> CacheResult<Self> {
        Self::open_with_version(path, map_size_mb, SCHEMA_VERSION)
    }

    fn open_with_version<P: AsRef<Path>>(
        path: P,
        map_size_mb: usize,
        version: u32,
    ) -> CacheResult<Self> {
        std::fs::create_dir_all(&path).map_err(io_err)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(io_err)?;

        let mut wtxn = env.write_txn().map_err(io_err)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(io_err)?;

        let stored = db
            .get(&wtxn, META_SCHEMA_KEY)
            .map_err(io_err)?
            .and_then(|bytes| bytes.try_into().ok().map(u32::from_le_bytes));

        if stored != Some(version) {
            if let Some(old) = stored {
                warn!(
                    stored = old,
                    current = version,
                    "disk tier schema version mismatch, clearing"
                );
            }
            db.clear(&mut wtxn).map_err(io_err)?;
            db.put(&mut wtxn, META_SCHEMA_KEY, &version.to_le_bytes())
                .map_err(io_err)?;
        }

        wtxn.commit().map_err(io_err)?;
        debug!(path = %path.as_ref().display(), "disk tier opened");

        Ok(Self { env, db })
    }

    fn collect_keys(&self, pattern: Option<&Regex>) -> CacheResult<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(io_err)?;
        let iter = self.db.iter(&rtxn).map_err(io_err)?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(io_err)?;
            if key == META_SCHEMA_KEY {
                continue;
            }
            let matched = match pattern {
                Some(pattern) => std::str::from_utf8(key)
                    .map(|rendered| pattern.is_match(rendered))
                    .unwrap_or(false),
                None => true,
            };
            if matched {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheTier for DiskTier {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<RawEntry>> {
        let rendered = key.render();
        let rtxn = self.env.read_txn().map_err(io_err)?;
        match self.db.get(&rtxn, rendered.as_bytes()).map_err(io_err)? {
            Some(bytes) => Ok(Some(EncodingBridge::decode_record(bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, entry: RawEntry) -> CacheResult<()> {
        let rendered = key.render();
        let record = EncodingBridge::encode_record(&entry);

        let mut wtxn = self.env.write_txn().map_err(io_err)?;
        self.db
            .put(&mut wtxn, rendered.as_bytes(), &record)
            .map_err(io_err)?;
        wtxn.commit().map_err(io_err)
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let rendered = key.render();
        let mut wtxn = self.env.write_txn().map_err(io_err)?;
        self.db
            .delete(&mut wtxn, rendered.as_bytes())
            .map_err(io_err)?;
        wtxn.commit().map_err(io_err)
    }

    async fn remove_matching(&self, pattern: &Regex) -> CacheResult<u64> {
        let keys = self.collect_keys(Some(pattern))?;

        let mut wtxn = self.env.write_txn().map_err(io_err)?;
        let mut removed = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(io_err)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(io_err)?;
        Ok(removed)
    }

    async fn remove_all(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(io_err)?;
        self.db.clear(&mut wtxn).map_err(io_err)?;
        self.db
            .put(&mut wtxn, META_SCHEMA_KEY, &SCHEMA_VERSION.to_le_bytes())
            .map_err(io_err)?;
        wtxn.commit().map_err(io_err)
    }

    async fn len(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(io_err)?;
        let total = self.db.len(&rtxn).map_err(io_err)?;
        // The meta key is not an entry.
        Ok(total.saturating_sub(1))
    }
}
