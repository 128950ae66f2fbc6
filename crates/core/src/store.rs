//! Claim store trait: durable, fingerprint-keyed claim persistence.
//!
//! Implementations: SQLite (durable, WAL) and in-memory (testing and
//! ephemeral sessions). Claims are scoped by session; the same statement
//! recorded in two sessions produces two independent rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::claim::Claim;
use crate::error::StoreError;

/// The core ClaimStore trait.
///
/// Writers are serialized per store instance; readers may run concurrently
/// and may observe a slightly stale active set.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert or update a claim. Returns `true` when anything changed.
    ///
    /// Identity (fingerprint and claim id) is recomputed from the claim's
    /// statement and evidence. An existing row is rewritten only when its
    /// fingerprint, confidence, statement or evidence differ, or when it has
    /// expired and is being re-verified.
    async fn upsert(&self, claim: Claim) -> std::result::Result<bool, StoreError>;

    /// Fetch one claim, archived or not.
    async fn get(&self, session_id: &str, claim_id: &str) -> std::result::Result<Option<Claim>, StoreError>;

    /// All non-archived claims for a session. Ordering is unspecified.
    async fn list_active(&self, session_id: &str) -> std::result::Result<Vec<Claim>, StoreError>;

    /// Permanently remove claims. Returns the number of rows removed.
    async fn delete(&self, session_id: &str, claim_ids: &[String]) -> std::result::Result<usize, StoreError>;

    /// Soft-remove claims: set the archived flag and timestamp.
    async fn archive(&self, session_id: &str, claim_ids: &[String]) -> std::result::Result<usize, StoreError>;

    /// Claims linked to any of the given topics.
    ///
    /// Expired and archived claims are excluded unless `include_inactive`.
    async fn claims_for_topic(
        &self,
        session_id: &str,
        topics: &[String],
        include_inactive: bool,
    ) -> std::result::Result<Vec<Claim>, StoreError>;

    /// Claims whose expiry lies at or before `now`, optionally for one session.
    async fn expired(
        &self,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<Claim>, StoreError>;

    /// Delete every claim that expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<usize, StoreError>;

    /// Delete archived claims whose archival predates `older_than`.
    async fn purge_archived(&self, older_than: DateTime<Utc>) -> std::result::Result<usize, StoreError>;

    /// Record that a session has announced an artifact.
    ///
    /// Returns `true` the first time a blob is seen in the session.
    async fn mark_artifact_seen(&self, session_id: &str, blob_id: &str) -> std::result::Result<bool, StoreError>;

    /// Count claims (archived included), optionally for one session.
    async fn count(&self, session_id: Option<&str>) -> std::result::Result<usize, StoreError>;
}
