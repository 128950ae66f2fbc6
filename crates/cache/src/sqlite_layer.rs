//! Durable cache layer backed by SQLite.
//!
//! Several layers may share one database file; rows are keyed by
//! `(layer, key)`. A row that cannot be decoded is dropped and reported as
//! a miss.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use claimcache_core::cache::{CacheEntry, CacheLayer, KeyPattern, LayerSettings, LayerStats};
use claimcache_core::error::CacheError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::eviction;

pub struct SqliteLayer {
    name: String,
    settings: LayerSettings,
    pool: SqlitePool,
    write_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SqliteLayer {
    /// Open (or create) a layer stored at `path`.
    pub async fn new(
        name: impl Into<String>,
        settings: LayerSettings,
        path: &str,
    ) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| CacheError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to open SQLite: {e}")))?;

        let layer = Self::from_pool(name, settings, pool).await?;
        info!(layer = %layer.name, "SQLite cache layer initialized at {path}");
        Ok(layer)
    }

    pub async fn from_pool(
        name: impl Into<String>,
        settings: LayerSettings,
        pool: SqlitePool,
    ) -> Result<Self, CacheError> {
        let layer = Self {
            name: name.into(),
            settings,
            pool,
            write_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        layer.run_migrations().await?;
        Ok(layer)
    }

    async fn run_migrations(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                layer       TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                created_ms  INTEGER NOT NULL,
                expires_at  TEXT,
                expires_ms  INTEGER,
                hits        INTEGER NOT NULL DEFAULT 0,
                quality     REAL NOT NULL DEFAULT 0.5,
                size_bytes  INTEGER NOT NULL DEFAULT 0,
                metadata    TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (layer, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("cache_entries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(layer, expires_ms)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("expiry index: {e}")))?;

        debug!("SQLite cache migrations complete");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry, CacheError> {
        let key: String = row
            .try_get("key")
            .map_err(|e| CacheError::Storage(format!("key column: {e}")))?;
        let corrupt = |reason: String| CacheError::Corrupt {
            key: key.clone(),
            reason,
        };

        let value_json: String = row
            .try_get("value")
            .map_err(|e| corrupt(format!("value column: {e}")))?;
        let value: serde_json::Value =
            serde_json::from_str(&value_json).map_err(|e| corrupt(format!("value: {e}")))?;

        let created_raw: String = row
            .try_get("created_at")
            .map_err(|e| corrupt(format!("created_at column: {e}")))?;
        let created_at = parse_ts(&created_raw).ok_or_else(|| corrupt("created_at".into()))?;

        let expires_raw: Option<String> = row.try_get("expires_at").unwrap_or(None);
        let expires_at = match expires_raw {
            Some(raw) => Some(parse_ts(&raw).ok_or_else(|| corrupt("expires_at".into()))?),
            None => None,
        };

        let metadata_json: String = row.try_get("metadata").unwrap_or_else(|_| "{}".into());
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(CacheEntry {
            key: key.clone(),
            value,
            created_at,
            expires_at,
            hits: row.try_get::<i64, _>("hits").unwrap_or(0).max(0) as u64,
            quality: row.try_get("quality").unwrap_or(0.5),
            size_bytes: row.try_get::<i64, _>("size_bytes").unwrap_or(0).max(0) as u64,
            metadata,
        })
    }

    /// Bookkeeping-only view of every row, for victim selection.
    async fn eviction_view(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = sqlx::query(
            "SELECT key, created_ms, hits, quality, size_bytes FROM cache_entries WHERE layer = ?1",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("Eviction scan failed: {e}")))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key: String = row.try_get("key").ok()?;
                let created_ms: i64 = row.try_get("created_ms").ok()?;
                let mut entry = CacheEntry::new(key, serde_json::Value::Null);
                entry.created_at = DateTime::from_timestamp_millis(created_ms)?;
                entry.hits = row.try_get::<i64, _>("hits").unwrap_or(0).max(0) as u64;
                entry.quality = row.try_get("quality").unwrap_or(0.5);
                entry.size_bytes = row.try_get::<i64, _>("size_bytes").unwrap_or(0).max(0) as u64;
                Some(entry)
            })
            .collect())
    }

    async fn totals(&self) -> Result<(usize, u64), CacheError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, COALESCE(SUM(size_bytes), 0) AS bytes FROM cache_entries WHERE layer = ?1",
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("Totals failed: {e}")))?;
        let count: i64 = row.try_get("cnt").unwrap_or(0);
        let bytes: i64 = row.try_get("bytes").unwrap_or(0);
        Ok((count.max(0) as usize, bytes.max(0) as u64))
    }

    async fn delete_key(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE layer = ?1 AND key = ?2")
            .bind(&self.name)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self) -> Result<usize, CacheError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE layer = ?1 AND expires_ms IS NOT NULL AND expires_ms <= ?2",
        )
        .bind(&self.name)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("Expiry sweep failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl CacheLayer for SqliteLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE layer = ?1 AND key = ?2")
            .bind(&self.name)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("SELECT failed: {e}")))?;

        let Some(row) = row else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let mut entry = match Self::row_to_entry(&row) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(layer = %self.name, "Dropping unreadable cache entry: {e}");
                let _guard = self.write_lock.lock().await;
                self.delete_key(key).await?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if entry.is_expired(Utc::now()) {
            let _guard = self.write_lock.lock().await;
            self.delete_key(key).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        sqlx::query("UPDATE cache_entries SET hits = hits + 1 WHERE layer = ?1 AND key = ?2")
            .bind(&self.name)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("Hit update failed: {e}")))?;

        entry.hits += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<(), CacheError> {
        if entry.expires_at.is_none() && self.settings.default_ttl_secs.is_some() {
            entry = entry.with_ttl(self.settings.default_ttl_secs);
        }
        let value_json = serde_json::to_string(&entry.value)?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        let _guard = self.write_lock.lock().await;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (
                layer, key, value, created_at, created_ms, expires_at, expires_ms,
                hits, quality, size_bytes, metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(layer, key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                created_ms = excluded.created_ms,
                expires_at = excluded.expires_at,
                expires_ms = excluded.expires_ms,
                hits = excluded.hits,
                quality = excluded.quality,
                size_bytes = excluded.size_bytes,
                metadata = excluded.metadata
            "#,
        )
        .bind(&self.name)
        .bind(&entry.key)
        .bind(&value_json)
        .bind(fmt_ts(entry.created_at))
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.expires_at.map(fmt_ts))
        .bind(entry.expires_at.map(|t| t.timestamp_millis()))
        .bind(entry.hits as i64)
        .bind(entry.quality)
        .bind(entry.size_bytes as i64)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage(format!("UPSERT failed: {e}")))?;

        self.delete_expired().await?;

        let (count, bytes) = self.totals().await?;
        if !self.settings.over_budget(count, bytes) {
            return Ok(());
        }

        let view = self.eviction_view().await?;
        let victims = eviction::select_victims(view.iter(), &self.settings, &entry.key);
        for victim in &victims {
            self.delete_key(victim).await?;
        }
        self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
        debug!(layer = %self.name, evicted = victims.len(), "Cache eviction");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().await;
        self.delete_key(key).await
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let _guard = self.write_lock.lock().await;
        let rows = sqlx::query("SELECT key FROM cache_entries WHERE layer = ?1")
            .bind(&self.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("Key scan failed: {e}")))?;

        let mut removed = 0;
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| CacheError::Storage(format!("key column: {e}")))?;
            if pattern.matches(&key) && self.delete_key(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = sqlx::query("SELECT * FROM cache_entries WHERE layer = ?1")
            .bind(&self.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("Entry scan failed: {e}")))?;

        Ok(rows
            .iter()
            .filter_map(|row| match Self::row_to_entry(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(layer = %self.name, "Skipping unreadable cache entry: {e}");
                    None
                }
            })
            .collect())
    }

    async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let _guard = self.write_lock.lock().await;
        self.delete_expired().await
    }

    async fn stats(&self) -> Result<LayerStats, CacheError> {
        let (entry_count, size_bytes) = self.totals().await?;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        Ok(LayerStats {
            layer: self.name.clone(),
            entry_count,
            size_bytes,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: LayerStats::compute_hit_rate(hits, misses),
        })
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM cache_entries WHERE layer = ?1")
            .bind(&self.name)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Storage(format!("Clear failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::cache::EvictionPolicy;
    use serde_json::json;

    async fn test_layer(max_entries: usize) -> SqliteLayer {
        let settings = LayerSettings {
            default_ttl_secs: Some(3600),
            max_entries,
            max_size_bytes: 0,
            eviction: EvictionPolicy::Oldest,
        };
        SqliteLayer::new("durable", settings, "sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_and_get() {
        let layer = test_layer(10).await;
        let mut meta = serde_json::Map::new();
        meta.insert("tool".into(), json!("web_search"));
        layer
            .put(CacheEntry::new("k", json!({"offers": [1, 2]})).with_metadata(meta))
            .await
            .unwrap();

        let entry = layer.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value["offers"][1], 2);
        assert_eq!(entry.metadata["tool"], "web_search");
        assert_eq!(entry.hits, 1);
        assert!(entry.expires_at.is_some());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let layer = test_layer(10).await;
        layer.put(CacheEntry::new("k", json!(1))).await.unwrap();
        sqlx::query("UPDATE cache_entries SET value = '{not json'")
            .execute(&layer.pool)
            .await
            .unwrap();

        assert!(layer.get("k").await.unwrap().is_none());
        assert_eq!(layer.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn oldest_evicted_over_cap() {
        let layer = test_layer(2).await;
        for key in ["a", "b", "c"] {
            layer.put(CacheEntry::new(key, json!(key))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let stats = layer.stats().await.unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.evictions, 1);
        assert!(layer.get("a").await.unwrap().is_none());
        assert!(layer.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_rows_are_swept() {
        let layer = test_layer(10).await;
        layer
            .put(CacheEntry::new("gone", json!(1)).with_ttl(Some(0)))
            .await
            .unwrap();
        layer
            .put(CacheEntry::new("kept", json!(1)).with_ttl(None))
            .await
            .unwrap();
        assert_eq!(layer.cleanup_expired().await.unwrap(), 0);
        assert_eq!(layer.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn entries_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cache.sqlite").display());
        let settings = LayerSettings::default();

        {
            let layer = SqliteLayer::new("durable", settings.clone(), &url).await.unwrap();
            layer.put(CacheEntry::new("k", json!("v"))).await.unwrap();
            layer.pool.close().await;
        }

        let layer = SqliteLayer::new("durable", settings, &url).await.unwrap();
        assert_eq!(layer.get("k").await.unwrap().unwrap().value, json!("v"));
    }

    #[tokio::test]
    async fn layers_sharing_a_file_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cache.sqlite").display());
        let a = SqliteLayer::new("a", LayerSettings::default(), &url).await.unwrap();
        let b = SqliteLayer::new("b", LayerSettings::default(), &url).await.unwrap();
        a.put(CacheEntry::new("k", json!(1))).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
        assert!(a.get("k").await.unwrap().is_some());
    }
}
