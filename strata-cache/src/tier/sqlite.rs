//! SQLite-backed persistent tier.
//!
//! The structured store for larger, longer-lived records such as daily
//! aggregates. Each record is `{ key, payload, written_at, day }`; the
//! `day` column supports the date-range queries callers use directly.
//! The orchestrator only ever uses the key/value view.
//!
//! Schema versioning follows the same policy as the disk tier: a version
//! mismatch at open clears all records unconditionally before any read.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use strata_core::{CacheError, CacheKey, CacheResult, CachedEntry, RawEntry, SCHEMA_VERSION};
use tracing::{debug, warn};

use super::CacheTier;

const DAY_FORMAT: &str = "%Y-%m-%d";

fn io_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::TierIo {
        tier: "sqlite",
        reason: e.to_string(),
    }
}

/// Structured persistent store, queryable by date.
pub struct SqliteTier {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTier {
    /// Open (or create) the persistent tier inside `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> CacheResult<Self> {
        Self::open_with_version(data_dir, SCHEMA_VERSION)
    }

    /// Create an in-memory tier (for testing).
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory().map_err(io_err)?;
        Self::from_connection(conn, SCHEMA_VERSION)
    }

    fn open_with_version<P: AsRef<Path>>(data_dir: P, version: u32) -> CacheResult<Self> {
        std::fs::create_dir_all(&data_dir).map_err(io_err)?;
        let db_path = data_dir.as_ref().join("strata.db");
        let conn = Connection::open(&db_path).map_err(io_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(io_err)?;

        let tier = Self::from_connection(conn, version)?;
        debug!(path = %db_path.display(), "sqlite tier opened");
        Ok(tier)
    }

    fn from_connection(conn: Connection, version: u32) -> CacheResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_records (
                key TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                written_at INTEGER NOT NULL,
                day TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_records_day
                ON cache_records(day);
            "#,
        )
        .map_err(io_err)?;

        let stored: Option<u32> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(io_err)?;

        if stored != Some(version) {
            if let Some(old) = stored {
                warn!(
                    stored = old,
                    current = version,
                    "sqlite tier schema version mismatch, clearing"
                );
            }
            conn.execute("DELETE FROM cache_records", []).map_err(io_err)?;
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![version],
            )
            .map_err(io_err)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| io_err("lock poisoned"))
    }

    /// Structured range query: all records whose day falls in
    /// `[start, end]` inclusive, ordered by day.
    ///
    /// This capability belongs to callers that need daily aggregates over
    /// a window; the orchestrator never uses it.
    pub fn records_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CacheResult<Vec<(String, RawEntry)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key, payload, written_at FROM cache_records
                WHERE day BETWEEN ?1 AND ?2
                ORDER BY day ASC, key ASC
                "#,
            )
            .map_err(io_err)?;

        let rows = stmt
            .query_map(
                params![
                    start.format(DAY_FORMAT).to_string(),
                    end.format(DAY_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(io_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (key, payload, millis) = row.map_err(io_err)?;
            let written_at = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| io_err(format!("timestamp out of range: {millis}")))?;
            let cost = payload.len() as u64;
            records.push((key, CachedEntry::with_written_at(payload, written_at, cost)));
        }
        Ok(records)
    }
}

#[async_trait]
impl CacheTier for SqliteTier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<RawEntry>> {
        let rendered = key.render();
        let conn = self.lock()?;
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT payload, written_at FROM cache_records WHERE key = ?1",
                params![rendered],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(io_err)?;

        match row {
            Some((payload, millis)) => {
                let written_at: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| io_err(format!("timestamp out of range: {millis}")))?;
                let cost = payload.len() as u64;
                Ok(Some(CachedEntry::with_written_at(payload, written_at, cost)))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, entry: RawEntry) -> CacheResult<()> {
        let rendered = key.render();
        let day = entry.written_at.date_naive().format(DAY_FORMAT).to_string();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_records (key, payload, written_at, day)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                rendered,
                entry.value,
                entry.written_at.timestamp_millis(),
                day
            ],
        )
        .map_err(io_err)?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let rendered = key.render();
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache_records WHERE key = ?1", params![rendered])
            .map_err(io_err)?;
        Ok(())
    }

    async fn remove_matching(&self, pattern: &Regex) -> CacheResult<u64> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM cache_records")
            .map_err(io_err)?;
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(io_err)?
            .filter_map(|r| r.ok())
            .filter(|rendered| pattern.is_match(rendered))
            .collect();
        drop(stmt);

        let mut removed = 0u64;
        for rendered in &keys {
            removed += conn
                .execute("DELETE FROM cache_records WHERE key = ?1", params![rendered])
                .map_err(io_err)? as u64;
        }
        Ok(removed)
    }

    async fn remove_all(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache_records", []).map_err(io_err)?;
        Ok(())
    }

    async fn len(&self) -> CacheResult<u64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM cache_records", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count as u64)
        .map_err(io_err)
    }
}
