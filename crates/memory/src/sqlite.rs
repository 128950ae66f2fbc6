//! SQLite claim store.
//!
//! One database file, three tables:
//! - `claims`: one row per (session, claim id), metadata as JSON
//! - `claim_topics`: secondary index from topic tag to claim
//! - `artifacts_seen`: blobs already announced per session
//!
//! Timestamps are stored as RFC 3339 text; expiry is additionally stored as
//! epoch milliseconds so range queries can use an index.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use claimcache_core::claim::{Claim, ClaimMetadata, Confidence};
use claimcache_core::error::StoreError;
use claimcache_core::store::ClaimStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A durable SQLite claim store.
pub struct SqliteClaimStore {
    pool: SqlitePool,
    /// Single-writer section; reads go straight to the pool.
    write_lock: Mutex<()>,
}

impl SqliteClaimStore {
    /// Open (or create) a store at `path`.
    ///
    /// Accepts a file path or a SQLite URL; `"sqlite::memory:"` gives an
    /// ephemeral database for tests.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        // An in-memory database exists per connection, so keep exactly one.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite claim store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS claims (
                session_id    TEXT NOT NULL,
                claim_id      TEXT NOT NULL,
                ticket_id     TEXT NOT NULL,
                statement     TEXT NOT NULL,
                evidence      TEXT NOT NULL DEFAULT '[]',
                confidence    TEXT NOT NULL,
                fingerprint   TEXT NOT NULL,
                last_verified TEXT NOT NULL,
                ttl_seconds   INTEGER NOT NULL,
                expires_at    TEXT,
                expires_ms    INTEGER,
                metadata      TEXT NOT NULL DEFAULT '{}',
                archived      INTEGER NOT NULL DEFAULT 0,
                archived_at   TEXT,
                archived_ms   INTEGER,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                PRIMARY KEY (session_id, claim_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("claims table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS claim_topics (
                session_id TEXT NOT NULL,
                claim_id   TEXT NOT NULL,
                topic      TEXT NOT NULL,
                PRIMARY KEY (session_id, claim_id, topic)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("claim_topics table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts_seen (
                session_id TEXT NOT NULL,
                blob_id    TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                PRIMARY KEY (session_id, blob_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("artifacts_seen table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_claims_expires ON claims(expires_ms)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("expiry index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_claims_active ON claims(session_id, archived)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("active index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_claim_topics_topic ON claim_topics(session_id, topic)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("topic index: {e}")))?;

        debug!("SQLite claim migrations complete");
        Ok(())
    }

    /// Parse a `Claim` from a row.
    ///
    /// Unparsable expiry yields `expires_at = None`, which the rest of the
    /// engine treats as "never expired".
    fn row_to_claim(row: &sqlx::sqlite::SqliteRow) -> Result<Claim, StoreError> {
        let get_text = |col: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };

        let claim_id = get_text("claim_id")?;
        let session_id = get_text("session_id")?;
        let ticket_id = get_text("ticket_id")?;
        let statement = get_text("statement")?;
        let fingerprint = get_text("fingerprint")?;
        let evidence_json = get_text("evidence")?;
        let metadata_json = get_text("metadata")?;
        let confidence_str = get_text("confidence")?;

        let ttl_seconds: i64 = row
            .try_get("ttl_seconds")
            .map_err(|e| StoreError::QueryFailed(format!("ttl_seconds column: {e}")))?;
        let archived: bool = row.try_get::<i64, _>("archived").unwrap_or(0) != 0;
        let expires_at_str: Option<String> = row.try_get("expires_at").unwrap_or(None);
        let archived_at_str: Option<String> = row.try_get("archived_at").unwrap_or(None);

        let evidence: Vec<String> = serde_json::from_str(&evidence_json).unwrap_or_default();
        let mut metadata: ClaimMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
            warn!("Claim {claim_id}: unreadable metadata ({e}), using defaults");
            ClaimMetadata::default()
        });
        metadata.archived = archived;
        metadata.archived_at = archived_at_str.as_deref().and_then(parse_ts);

        let confidence = Confidence::from_str(&confidence_str).unwrap_or_default();
        let now = Utc::now();
        let last_verified = get_text("last_verified")
            .ok()
            .as_deref()
            .and_then(parse_ts)
            .unwrap_or(now);
        let created_at = get_text("created_at")
            .ok()
            .as_deref()
            .and_then(parse_ts)
            .unwrap_or(now);
        let updated_at = get_text("updated_at")
            .ok()
            .as_deref()
            .and_then(parse_ts)
            .unwrap_or(created_at);

        Ok(Claim {
            claim_id,
            session_id,
            ticket_id,
            statement,
            evidence,
            confidence,
            fingerprint,
            last_verified,
            ttl_seconds,
            expires_at: expires_at_str.as_deref().and_then(parse_ts),
            metadata,
            created_at,
            updated_at,
        })
    }

    async fn fetch_one(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &str,
        claim_id: &str,
    ) -> Result<Option<Claim>, StoreError> {
        let row = sqlx::query("SELECT * FROM claims WHERE session_id = ?1 AND claim_id = ?2")
            .bind(session_id)
            .bind(claim_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT claim: {e}")))?;
        row.as_ref().map(Self::row_to_claim).transpose()
    }

    async fn write_claim(
        tx: &mut Transaction<'_, Sqlite>,
        claim: &Claim,
    ) -> Result<(), StoreError> {
        let evidence_json = serde_json::to_string(&claim.evidence)
            .map_err(|e| StoreError::Storage(format!("Evidence serialization: {e}")))?;
        let metadata_json = serde_json::to_string(&claim.metadata)
            .map_err(|e| StoreError::Storage(format!("Metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO claims (
                session_id, claim_id, ticket_id, statement, evidence, confidence,
                fingerprint, last_verified, ttl_seconds, expires_at, expires_ms,
                metadata, archived, archived_at, archived_ms, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(session_id, claim_id) DO UPDATE SET
                ticket_id = excluded.ticket_id,
                statement = excluded.statement,
                evidence = excluded.evidence,
                confidence = excluded.confidence,
                fingerprint = excluded.fingerprint,
                last_verified = excluded.last_verified,
                ttl_seconds = excluded.ttl_seconds,
                expires_at = excluded.expires_at,
                expires_ms = excluded.expires_ms,
                metadata = excluded.metadata,
                archived = excluded.archived,
                archived_at = excluded.archived_at,
                archived_ms = excluded.archived_ms,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&claim.session_id)
        .bind(&claim.claim_id)
        .bind(&claim.ticket_id)
        .bind(&claim.statement)
        .bind(&evidence_json)
        .bind(claim.confidence.as_str())
        .bind(&claim.fingerprint)
        .bind(fmt_ts(claim.last_verified))
        .bind(claim.ttl_seconds)
        .bind(claim.expires_at.map(fmt_ts))
        .bind(claim.expires_at.map(|t| t.timestamp_millis()))
        .bind(&metadata_json)
        .bind(claim.metadata.archived as i64)
        .bind(claim.metadata.archived_at.map(fmt_ts))
        .bind(claim.metadata.archived_at.map(|t| t.timestamp_millis()))
        .bind(fmt_ts(claim.created_at))
        .bind(fmt_ts(claim.updated_at))
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT claim failed: {e}")))?;

        sqlx::query("DELETE FROM claim_topics WHERE session_id = ?1 AND claim_id = ?2")
            .bind(&claim.session_id)
            .bind(&claim.claim_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Topic reset failed: {e}")))?;

        for topic in &claim.metadata.topics {
            sqlx::query(
                "INSERT OR IGNORE INTO claim_topics (session_id, claim_id, topic) VALUES (?1, ?2, ?3)",
            )
            .bind(&claim.session_id)
            .bind(&claim.claim_id)
            .bind(topic)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Topic insert failed: {e}")))?;
        }

        Ok(())
    }

    async fn delete_rows(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &str,
        claim_id: &str,
    ) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM claim_topics WHERE session_id = ?1 AND claim_id = ?2")
            .bind(session_id)
            .bind(claim_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Topic delete failed: {e}")))?;

        let result = sqlx::query("DELETE FROM claims WHERE session_id = ?1 AND claim_id = ?2")
            .bind(session_id)
            .bind(claim_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))
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

async fn commit(tx: Transaction<'_, Sqlite>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))
}

#[async_trait]
impl ClaimStore for SqliteClaimStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, mut claim: Claim) -> Result<bool, StoreError> {
        claim.refresh_identity();
        if claim.session_id.is_empty() {
            return Err(StoreError::InvalidClaim("session_id is empty".into()));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;
        let now = Utc::now();

        if let Some(existing) = Self::fetch_one(&mut tx, &claim.session_id, &claim.claim_id).await? {
            if !claim.content_differs(&existing) && !existing.is_expired(now) {
                if let Some(refreshed) = claim.refresh_of(&existing, now) {
                    Self::write_claim(&mut tx, &refreshed).await?;
                    commit(tx).await?;
                    debug!("Refreshed claim {} in session {}", claim.claim_id, claim.session_id);
                }
                return Ok(false);
            }
            claim.created_at = existing.created_at;
            claim.updated_at = now;
        }

        Self::write_claim(&mut tx, &claim).await?;
        commit(tx).await?;
        debug!("Upserted claim {} in session {}", claim.claim_id, claim.session_id);
        Ok(true)
    }

    async fn get(&self, session_id: &str, claim_id: &str) -> Result<Option<Claim>, StoreError> {
        let row = sqlx::query("SELECT * FROM claims WHERE session_id = ?1 AND claim_id = ?2")
            .bind(session_id)
            .bind(claim_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Get failed: {e}")))?;
        row.as_ref().map(Self::row_to_claim).transpose()
    }

    async fn list_active(&self, session_id: &str) -> Result<Vec<Claim>, StoreError> {
        let rows = sqlx::query("SELECT * FROM claims WHERE session_id = ?1 AND archived = 0")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("List active failed: {e}")))?;
        rows.iter().map(Self::row_to_claim).collect()
    }

    async fn delete(&self, session_id: &str, claim_ids: &[String]) -> Result<usize, StoreError> {
        if claim_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;
        let mut removed = 0;
        for id in claim_ids {
            if Self::delete_rows(&mut tx, session_id, id).await? {
                removed += 1;
            }
        }
        commit(tx).await?;
        Ok(removed)
    }

    async fn archive(&self, session_id: &str, claim_ids: &[String]) -> Result<usize, StoreError> {
        if claim_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;
        let now = Utc::now();
        let mut archived = 0;
        for id in claim_ids {
            let result = sqlx::query(
                r#"
                UPDATE claims
                SET archived = 1, archived_at = ?3, archived_ms = ?4, updated_at = ?3
                WHERE session_id = ?1 AND claim_id = ?2 AND archived = 0
                "#,
            )
            .bind(session_id)
            .bind(id)
            .bind(fmt_ts(now))
            .bind(now.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Archive failed: {e}")))?;
            archived += result.rows_affected() as usize;
        }
        commit(tx).await?;
        Ok(archived)
    }

    async fn claims_for_topic(
        &self,
        session_id: &str,
        topics: &[String],
        include_inactive: bool,
    ) -> Result<Vec<Claim>, StoreError> {
        if topics.is_empty() {
            return Ok(vec![]);
        }

        let placeholders: Vec<String> = (0..topics.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            r#"
            SELECT DISTINCT c.*
            FROM claims c
            JOIN claim_topics t ON t.session_id = c.session_id AND t.claim_id = c.claim_id
            WHERE c.session_id = ?1 AND t.topic IN ({})
            "#,
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(session_id);
        for topic in topics {
            query = query.bind(topic);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Topic lookup failed: {e}")))?;

        let now = Utc::now();
        let mut claims = Vec::with_capacity(rows.len());
        for row in &rows {
            let claim = Self::row_to_claim(row)?;
            if include_inactive || (!claim.is_archived() && !claim.is_expired(now)) {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    async fn expired(
        &self,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Claim>, StoreError> {
        let rows = match session_id {
            Some(session) => {
                sqlx::query("SELECT * FROM claims WHERE session_id = ?1 AND expires_ms <= ?2")
                    .bind(session)
                    .bind(now.timestamp_millis())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM claims WHERE expires_ms <= ?1")
                    .bind(now.timestamp_millis())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::QueryFailed(format!("Expiry scan failed: {e}")))?;

        let mut claims = Vec::with_capacity(rows.len());
        for row in &rows {
            let claim = Self::row_to_claim(row)?;
            // The parsed timestamp is authoritative.
            if claim.is_expired(now) {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired = self.expired(None, now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;
        let mut removed = 0;
        for claim in &expired {
            if Self::delete_rows(&mut tx, &claim.session_id, &claim.claim_id).await? {
                removed += 1;
            }
        }
        commit(tx).await?;
        info!("Purged {removed} expired claims");
        Ok(removed)
    }

    async fn purge_archived(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM claim_topics WHERE EXISTS (
                SELECT 1 FROM claims c
                WHERE c.session_id = claim_topics.session_id
                  AND c.claim_id = claim_topics.claim_id
                  AND c.archived = 1 AND c.archived_ms < ?1
            )
            "#,
        )
        .bind(older_than.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("Archived topic purge failed: {e}")))?;

        let result = sqlx::query("DELETE FROM claims WHERE archived = 1 AND archived_ms < ?1")
            .bind(older_than.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Archived purge failed: {e}")))?;

        commit(tx).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn mark_artifact_seen(&self, session_id: &str, blob_id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO artifacts_seen (session_id, blob_id, first_seen) VALUES (?1, ?2, ?3)",
        )
        .bind(session_id)
        .bind(blob_id)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Artifact insert failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, session_id: Option<&str>) -> Result<usize, StoreError> {
        let row = match session_id {
            Some(session) => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM claims WHERE session_id = ?1")
                    .bind(session)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM claims")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::QueryFailed(format!("Count failed: {e}")))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("Count column: {e}")))?;
        Ok(count as usize)
    }
}
