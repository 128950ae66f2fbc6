//! Working-memory pruner.
//!
//! Keeps a session's active claims under a cap:
//!
//! 1. Hard-delete claims past their expiry (unknown expiry is kept).
//! 2. Ask the evaluator about the rest; errors count as `Keep`.
//! 3. Rank by stored score, then most recently updated.
//! 4. Keep the first `max_claims`, archive or delete the overflow.

use chrono::Utc;
use claimcache_config::PruneMode;
use claimcache_core::capsule::WorkingMemorySnapshot;
use claimcache_core::claim::Claim;
use claimcache_core::error::StoreError;
use claimcache_core::evaluator::{ClaimEvaluator, KeepAllEvaluator, Verdict};
use claimcache_core::store::ClaimStore;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from one prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub expired: usize,
    pub evaluator_archived: usize,
    pub evaluator_deleted: usize,
    pub overflow: usize,
    pub kept: usize,
}

/// A snapshot plus what it took to produce it.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub snapshot: WorkingMemorySnapshot,
    pub stats: PruneStats,
}

pub struct WorkingMemoryPruner {
    store: Arc<dyn ClaimStore>,
    evaluator: Arc<dyn ClaimEvaluator>,
    mode: PruneMode,
    excluded_domains: Vec<String>,
}

impl WorkingMemoryPruner {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self {
            store,
            evaluator: Arc::new(KeepAllEvaluator),
            mode: PruneMode::default(),
            excluded_domains: Vec::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ClaimEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_mode(mut self, mode: PruneMode) -> Self {
        self.mode = mode;
        self
    }

    /// Domains hidden from returned snapshots. They still count toward the cap.
    pub fn with_excluded_domains(mut self, domains: Vec<String>) -> Self {
        self.excluded_domains = domains;
        self
    }

    /// Prune a session and return the resulting working memory.
    pub async fn prune(&self, session_id: &str, max_claims: usize) -> Result<WorkingMemorySnapshot, StoreError> {
        Ok(self.prune_with_stats(session_id, max_claims).await?.snapshot)
    }

    pub async fn prune_with_stats(&self, session_id: &str, max_claims: usize) -> Result<PruneOutcome, StoreError> {
        let mut stats = PruneStats::default();
        let now = Utc::now();

        let (expired, live): (Vec<Claim>, Vec<Claim>) = self
            .store
            .list_active(session_id)
            .await?
            .into_iter()
            .partition(|c| c.is_expired(now));

        if !expired.is_empty() {
            stats.expired = self.store.delete(session_id, &ids(&expired)).await?;
        }

        // ── Evaluator pass ──────────────────────────────────────────────
        let verdicts = join_all(live.iter().map(|claim| self.evaluator.classify(claim))).await;

        let mut kept = Vec::with_capacity(live.len());
        let mut to_archive = Vec::new();
        let mut to_delete = Vec::new();
        for (claim, verdict) in live.into_iter().zip(verdicts) {
            let verdict = verdict.unwrap_or_else(|e| {
                warn!(
                    evaluator = self.evaluator.name(),
                    claim_id = %claim.claim_id,
                    "Evaluator failed, keeping claim: {e}"
                );
                Verdict::Keep
            });
            match verdict {
                Verdict::Keep => kept.push(claim),
                Verdict::Archive => to_archive.push(claim.claim_id),
                Verdict::Delete => to_delete.push(claim.claim_id),
            }
        }
        if !to_archive.is_empty() {
            stats.evaluator_archived = self.store.archive(session_id, &to_archive).await?;
        }
        if !to_delete.is_empty() {
            stats.evaluator_deleted = self.store.delete(session_id, &to_delete).await?;
        }

        // ── Cap ─────────────────────────────────────────────────────────
        // Excluded domains stay stored but neither take a slot nor get pruned.
        let (hidden, mut kept): (Vec<Claim>, Vec<Claim>) =
            kept.into_iter().partition(|c| self.is_excluded(c));
        kept.sort_by(|a, b| {
            b.metadata
                .score
                .total_cmp(&a.metadata.score)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        let overflow = if kept.len() > max_claims {
            kept.split_off(max_claims)
        } else {
            Vec::new()
        };
        if !overflow.is_empty() {
            let overflow_ids = ids(&overflow);
            stats.overflow = match self.mode {
                PruneMode::Archive => self.store.archive(session_id, &overflow_ids).await?,
                PruneMode::Delete => self.store.delete(session_id, &overflow_ids).await?,
            };
            debug!(session_id, mode = ?self.mode, count = stats.overflow, "Pruned overflow claims");
        }
        stats.kept = kept.len();
        if !hidden.is_empty() {
            debug!(session_id, hidden = hidden.len(), "Excluded-domain claims left out of the cap");
        }

        info!(
            session_id,
            kept = stats.kept,
            expired = stats.expired,
            overflow = stats.overflow,
            "Working memory pruned"
        );

        Ok(PruneOutcome {
            snapshot: WorkingMemorySnapshot::from_claims(kept),
            stats,
        })
    }
}

impl WorkingMemoryPruner {
    fn is_excluded(&self, claim: &Claim) -> bool {
        claim
            .metadata
            .domain
            .as_deref()
            .is_some_and(|d| self.excluded_domains.iter().any(|x| x == d))
    }
}

fn ids(claims: &[Claim]) -> Vec<String> {
    claims.iter().map(|c| c.claim_id.clone()).collect()
}
