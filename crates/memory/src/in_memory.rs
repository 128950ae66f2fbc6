//! In-memory claim store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claimcache_core::claim::Claim;
use claimcache_core::error::StoreError;
use claimcache_core::store::ClaimStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    /// (session_id, claim_id) → claim
    claims: HashMap<(String, String), Claim>,
    /// (session_id, blob_id)
    artifacts_seen: HashSet<(String, String)>,
}

/// A claim store held in a `HashMap`.
/// Nothing survives a restart.
pub struct InMemoryClaimStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(session_id: &str, claim_id: &str) -> (String, String) {
    (session_id.to_string(), claim_id.to_string())
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(&self, mut claim: Claim) -> Result<bool, StoreError> {
        claim.refresh_identity();
        if claim.session_id.is_empty() {
            return Err(StoreError::InvalidClaim("session_id is empty".into()));
        }

        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let k = key(&claim.session_id, &claim.claim_id);

        if let Some(existing) = tables.claims.get(&k) {
            if !claim.content_differs(existing) && !existing.is_expired(now) {
                if let Some(refreshed) = claim.refresh_of(existing, now) {
                    tables.claims.insert(k, refreshed);
                }
                return Ok(false);
            }
            claim.created_at = existing.created_at;
            claim.updated_at = now;
        }

        tables.claims.insert(k, claim);
        Ok(true)
    }

    async fn get(&self, session_id: &str, claim_id: &str) -> Result<Option<Claim>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.claims.get(&key(session_id, claim_id)).cloned())
    }

    async fn list_active(&self, session_id: &str) -> Result<Vec<Claim>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .claims
            .values()
            .filter(|c| c.session_id == session_id && !c.is_archived())
            .cloned()
            .collect())
    }

    async fn delete(&self, session_id: &str, claim_ids: &[String]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(claim_ids
            .iter()
            .filter(|id| tables.claims.remove(&key(session_id, id)).is_some())
            .count())
    }

    async fn archive(&self, session_id: &str, claim_ids: &[String]) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut archived = 0;
        for id in claim_ids {
            if let Some(claim) = tables.claims.get_mut(&key(session_id, id)) {
                if !claim.metadata.archived {
                    claim.metadata.archived = true;
                    claim.metadata.archived_at = Some(now);
                    claim.updated_at = now;
                    archived += 1;
                }
            }
        }
        Ok(archived)
    }

    async fn claims_for_topic(
        &self,
        session_id: &str,
        topics: &[String],
        include_inactive: bool,
    ) -> Result<Vec<Claim>, StoreError> {
        let tables = self.tables.read().await;
        let now = Utc::now();
        Ok(tables
            .claims
            .values()
            .filter(|c| c.session_id == session_id)
            .filter(|c| c.metadata.topics.iter().any(|t| topics.contains(t)))
            .filter(|c| include_inactive || (!c.is_archived() && !c.is_expired(now)))
            .cloned()
            .collect())
    }

    async fn expired(
        &self,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Claim>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .claims
            .values()
            .filter(|c| session_id.is_none_or(|s| c.session_id == s))
            .filter(|c| c.is_expired(now))
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.claims.len();
        tables.claims.retain(|_, c| !c.is_expired(now));
        Ok(before - tables.claims.len())
    }

    async fn purge_archived(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.claims.len();
        tables.claims.retain(|_, c| {
            !(c.metadata.archived && c.metadata.archived_at.is_some_and(|at| at < older_than))
        });
        Ok(before - tables.claims.len())
    }

    async fn mark_artifact_seen(&self, session_id: &str, blob_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.artifacts_seen.insert(key(session_id, blob_id)))
    }

    async fn count(&self, session_id: Option<&str>) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .claims
            .values()
            .filter(|c| session_id.is_none_or(|s| c.session_id == s))
            .count())
    }
}
