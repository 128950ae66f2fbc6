//! Capsule compiler: one ticket's raw outputs to a budgeted capsule.
//!
//! Pipeline per compile:
//!
//! ```text
//! bundle ──► extract ──► score ──► top-N ──► quality TTL ──► upsert ──► prune ──► envelope
//!                                                              │
//!                                                              └─► delta (changed claims)
//! ```
//!
//! Compiles of one session are serialized behind a per-session lock so each
//! compile sees the previous one's pruned working memory. Different sessions
//! never wait on each other.

use chrono::Utc;
use claimcache_config::CapsuleConfig;
use claimcache_core::bundle::{RawOutputBundle, ToolRecord};
use claimcache_core::capsule::{
    BudgetReport, Capsule, CapsuleDelta, CapsuleEnvelope, CapsuleStatus, QualityReport,
    SessionContext, Ticket, WorkingMemorySnapshot,
};
use claimcache_core::claim::{ArtifactRef, Claim, ClaimMetadata, Confidence};
use claimcache_core::error::StoreError;
use claimcache_core::freshness::{self, HOUR_SECS};
use claimcache_core::store::ClaimStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::context::{compress_context, truncate_to_chars};
use crate::extract;
use crate::prune::WorkingMemoryPruner;
use crate::quality;
use crate::score::{self, ScoredCandidate};
use crate::token::{estimate_tokens, tokens_for_chars};

/// Longest raw statement used as a summary line.
const SUMMARY_CHARS: usize = 160;

/// Everything the compiler needs for one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub session_id: String,
    pub ticket: Ticket,
    #[serde(default)]
    pub bundle: RawOutputBundle,
    #[serde(default)]
    pub tool_records: Vec<ToolRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContext>,
}

impl CompileRequest {
    pub fn new(session_id: impl Into<String>, ticket: Ticket, bundle: RawOutputBundle) -> Self {
        Self {
            session_id: session_id.into(),
            ticket,
            bundle,
            tool_records: Vec::new(),
            context: None,
        }
    }

    pub fn with_records(mut self, records: Vec<ToolRecord>) -> Self {
        self.tool_records = records;
        self
    }

    pub fn with_context(mut self, context: SessionContext) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub capsule: Capsule,
    pub delta: CapsuleDelta,
    pub envelope: CapsuleEnvelope,
    pub working_memory: WorkingMemorySnapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Claim store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid compile request: {0}")]
    InvalidRequest(String),
}

pub struct CapsuleCompiler {
    store: Arc<dyn ClaimStore>,
    pruner: Arc<WorkingMemoryPruner>,
    config: CapsuleConfig,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CapsuleCompiler {
    pub fn new(store: Arc<dyn ClaimStore>, pruner: Arc<WorkingMemoryPruner>, config: CapsuleConfig) -> Self {
        Self {
            store,
            pruner,
            config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CapsuleConfig {
        &self.config
    }

    /// Compile one ticket into a capsule, delta and envelope.
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileOutput, CompileError> {
        if request.session_id.trim().is_empty() {
            return Err(CompileError::InvalidRequest("session_id is empty".into()));
        }
        if request.ticket.id.trim().is_empty() {
            return Err(CompileError::InvalidRequest("ticket id is empty".into()));
        }

        let lock = self.session_lock(&request.session_id);
        let result = {
            let _guard = lock.lock().await;
            self.compile_locked(request).await
        };
        drop(lock);
        self.release_idle_locks();
        result
    }

    async fn compile_locked(&self, request: CompileRequest) -> Result<CompileOutput, CompileError> {
        let CompileRequest {
            session_id,
            ticket,
            bundle,
            tool_records,
            context,
        } = request;
        let limits = &self.config;

        // ── Extract ─────────────────────────────────────────────────────
        let mut extracted = extract::extract_bundle(&bundle);
        extracted.extend(extract::extract_records(&tool_records, &bundle));
        let considered = extracted.len();
        let (diagnostics, regular): (Vec<_>, Vec<_>) =
            extracted.into_iter().partition(|c| c.is_diagnostic());
        let status = if regular.is_empty() {
            CapsuleStatus::Empty
        } else {
            CapsuleStatus::Ok
        };

        // ── Score ───────────────────────────────────────────────────────
        let now = Utc::now();
        let active: HashSet<String> = self
            .store
            .list_active(&session_id)
            .await?
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| c.fingerprint)
            .collect();

        let mut ranked = score::score_candidates(regular, &ticket.goal, &active);
        let before = ranked.len();
        ranked.retain(|s| !s.breakdown.duplicate_url);
        if ranked.len() < before {
            debug!(dropped = before - ranked.len(), "Dropped duplicate-URL candidates");
        }
        let omitted = ranked.len().saturating_sub(limits.capsule_claim_limit);
        ranked.truncate(limits.capsule_claim_limit);
        let diagnostics = score::score_candidates(diagnostics, &ticket.goal, &active);

        // ── Persist ─────────────────────────────────────────────────────
        let mut claims = Vec::with_capacity(ranked.len() + diagnostics.len());
        let mut delta = CapsuleDelta::default();
        for scored in ranked.iter().chain(diagnostics.iter()) {
            let claim = to_claim(&session_id, &ticket.id, scored);
            if self.store.upsert(claim.clone()).await? {
                delta.claims.push(claim.clone());
            }
            claims.push(claim);
        }
        debug!(
            session_id = %session_id,
            ticket_id = %ticket.id,
            selected = claims.len(),
            changed = delta.claims.len(),
            "Claims persisted"
        );

        // ── Prune ───────────────────────────────────────────────────────
        let working_memory = self.pruner.prune(&session_id, limits.max_working_memory).await?;

        // ── Artifacts ───────────────────────────────────────────────────
        let mut batch_blobs = HashSet::new();
        let artifacts: Vec<ArtifactRef> = claims
            .iter()
            .filter_map(|c| c.metadata.artifact.clone())
            .filter(|a| batch_blobs.insert(a.blob_id.clone()))
            .collect();

        let mut announced = Vec::new();
        for artifact in &artifacts {
            if announced.len() >= limits.max_artifacts {
                break;
            }
            if self.store.mark_artifact_seen(&session_id, &artifact.blob_id).await? {
                announced.push(artifact.clone());
            }
        }
        delta.artifacts = announced.clone();

        // ── Envelope ────────────────────────────────────────────────────
        let quality_report = quality::quality_report(&tool_records, limits.quality_threshold);
        let caveats = collect_caveats(&claims, omitted, quality_report.as_ref(), limits);
        let open_questions = collect_open_questions(&claims, quality_report.as_ref(), limits);
        let budget = budget_report(&bundle, &claims, considered);

        let visible: Vec<&Claim> = claims
            .iter()
            .filter(|c| working_memory.contains_fingerprint(&c.fingerprint))
            .take(limits.capsule_claim_limit)
            .collect();

        let envelope = CapsuleEnvelope {
            session_id: session_id.clone(),
            ticket_id: ticket.id.clone(),
            status,
            claim_ids: visible.iter().map(|c| c.claim_id.clone()).collect(),
            summaries: visible.iter().map(|c| summary_line(c)).collect(),
            caveats: caveats.clone(),
            open_questions: open_questions.clone(),
            artifacts: announced,
            has_delta: !delta.is_empty(),
            budget: budget.clone(),
            quality_report,
            context_block: context
                .as_ref()
                .and_then(|c| compress_context(c, limits.context_budget_tokens)),
        };

        info!(
            session_id = %session_id,
            ticket_id = %ticket.id,
            status = ?status,
            claims = envelope.claim_ids.len(),
            delta = delta.claims.len(),
            "Capsule compiled"
        );

        let capsule = Capsule {
            session_id,
            ticket_id: ticket.id,
            status,
            claims,
            artifacts,
            caveats,
            open_questions,
            budget,
        };

        Ok(CompileOutput {
            capsule,
            delta,
            envelope,
            working_memory,
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop lock entries nobody is holding or waiting on.
    fn release_idle_locks(&self) {
        let mut locks = self.session_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

// ── Claim construction ──────────────────────────────────────────────────

/// Turn a scored candidate into a claim with a quality-adjusted TTL.
fn to_claim(session_id: &str, ticket_id: &str, scored: &ScoredCandidate) -> Claim {
    let c = &scored.candidate;
    let quality = quality::claim_quality(scored.breakdown.relevance, c.evidence.len(), &c.text);
    let ttl = freshness::quality_ttl_hours(quality.overall) * HOUR_SECS;

    let metadata = ClaimMetadata {
        score: c.score,
        domain: c.domain.clone(),
        topics: c.topics.clone(),
        quality: Some(quality),
        artifact: c.artifact.clone(),
        source_tool: Some(c.source_tool.clone()),
        extra: c.metadata.clone(),
        ..Default::default()
    };
    Claim::new(session_id, ticket_id, c.text.clone(), c.evidence.clone(), c.confidence, ttl)
        .with_metadata(metadata)
}

/// One line per claim: structured fields when the extractor kept a title.
pub fn summary_line(claim: &Claim) -> String {
    let extra = &claim.metadata.extra;
    let field = |key: &str| {
        extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    match field("title") {
        Some(title) => {
            let mut parts = vec![title];
            parts.extend(
                ["price", "vendor", "source", "availability", "url"]
                    .into_iter()
                    .filter_map(field),
            );
            parts.join(" | ")
        }
        None => truncate_to_chars(claim.statement.trim(), SUMMARY_CHARS),
    }
}

fn collect_caveats(
    claims: &[Claim],
    omitted: usize,
    report: Option<&QualityReport>,
    limits: &CapsuleConfig,
) -> Vec<String> {
    let mut out: Vec<String> = claims
        .iter()
        .filter(|c| c.metadata.is_zero_results())
        .map(|c| c.statement.clone())
        .collect();
    if omitted > 0 {
        out.push(format!("{omitted} lower-ranked candidates omitted"));
    }
    if let Some(r) = report.filter(|r| r.quality_score < limits.quality_threshold) {
        out.push(format!(
            "Only {} of {} commerce results passed verification",
            r.verified, r.total_fetched
        ));
    }
    out.extend(
        claims
            .iter()
            .filter(|c| c.confidence == Confidence::Low && !c.metadata.is_zero_results())
            .map(|c| format!("Unverified: {}", truncate_to_chars(&c.statement, 80))),
    );
    out.truncate(limits.max_caveats);
    out
}

fn collect_open_questions(claims: &[Claim], report: Option<&QualityReport>, limits: &CapsuleConfig) -> Vec<String> {
    let mut out: Vec<String> = claims
        .iter()
        .filter(|c| c.metadata.is_zero_results())
        .filter_map(|c| c.metadata.extra.get("suggested_refinement").and_then(Value::as_str))
        .map(|hint| format!("Retry the search? Suggestion: {hint}"))
        .collect();
    if let Some(refinement) = report.and_then(|r| r.suggested_refinement.as_ref()) {
        out.push(format!(
            "Refine the commerce query ({}): {}",
            refinement.dominant_reason, refinement.hint
        ));
    }
    out.truncate(limits.max_open_questions);
    out
}

fn budget_report(bundle: &RawOutputBundle, claims: &[Claim], considered: usize) -> BudgetReport {
    let raw_chars = bundle.approx_chars();
    let selected_chars: usize = claims.iter().map(|c| c.statement.len()).sum();
    BudgetReport {
        raw_chars,
        selected_chars,
        raw_tokens: tokens_for_chars(raw_chars),
        selected_tokens: claims.iter().map(|c| estimate_tokens(&c.statement)).sum(),
        candidates_considered: considered,
        claims_selected: claims.len(),
        compression_ratio: if raw_chars == 0 {
            0.0
        } else {
            selected_chars as f64 / raw_chars as f64
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::bundle::RawOutput;
    use claimcache_memory::InMemoryClaimStore;
    use serde_json::json;

    fn compiler_with(config: CapsuleConfig) -> (CapsuleCompiler, Arc<InMemoryClaimStore>) {
        let store = Arc::new(InMemoryClaimStore::new());
        let pruner = Arc::new(WorkingMemoryPruner::new(store.clone()));
        (CapsuleCompiler::new(store.clone(), pruner, config), store)
    }

    fn research_bundle(n: usize) -> RawOutputBundle {
        let hits: Vec<Value> = (0..n)
            .map(|i| json!({"title": format!("Result {i}"), "snippet": "tokio runtime notes", "url": format!("https://r.example/{i}")}))
            .collect();
        RawOutputBundle::new(vec![
            RawOutput::new("research.web_search", "h1", "").with_metadata(json!({"query": "tokio", "results": hits})),
        ])
    }

    #[tokio::test]
    async fn rejects_blank_session() {
        let (compiler, _) = compiler_with(CapsuleConfig::default());
        let req = CompileRequest::new(" ", Ticket::new("t1", "g"), RawOutputBundle::default());
        assert!(matches!(
            compiler.compile(req).await,
            Err(CompileError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn selects_top_n_and_reports_omitted() {
        let config = CapsuleConfig {
            capsule_claim_limit: 3,
            ..Default::default()
        };
        let (compiler, store) = compiler_with(config);
        let out = compiler
            .compile(CompileRequest::new("s", Ticket::new("t1", "tokio runtime"), research_bundle(5)))
            .await
            .unwrap();

        assert_eq!(out.capsule.status, CapsuleStatus::Ok);
        assert_eq!(out.capsule.claims.len(), 3);
        assert_eq!(out.delta.claims.len(), 3);
        assert_eq!(out.envelope.claim_ids.len(), 3);
        assert!(out.envelope.caveats.iter().any(|c| c == "2 lower-ranked candidates omitted"));
        assert_eq!(out.capsule.budget.candidates_considered, 5);
        assert_eq!(store.list_active("s").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn claim_ttl_comes_from_quality() {
        let (compiler, _) = compiler_with(CapsuleConfig::default());
        let out = compiler
            .compile(CompileRequest::new("s", Ticket::new("t1", "unrelated"), research_bundle(1)))
            .await
            .unwrap();
        let claim = &out.capsule.claims[0];
        let quality = claim.metadata.quality.unwrap();
        assert_eq!(
            claim.ttl_seconds,
            freshness::quality_ttl_hours(quality.overall) * HOUR_SECS
        );
        assert_eq!(claim.metadata.source_tool.as_deref(), Some("research.web_search"));
    }

    #[tokio::test]
    async fn summaries_use_structured_fields() {
        let (compiler, _) = compiler_with(CapsuleConfig::default());
        let bundle = RawOutputBundle::new(vec![RawOutput::new("commerce.search_offers", "h1", "").with_metadata(json!({
            "offers": [{"title": "Pixel 9", "price": 499, "vendor": "Acme", "url": "https://acme.example/p9"}]
        }))]);
        let out = compiler
            .compile(CompileRequest::new("s", Ticket::new("t1", "pixel price"), bundle))
            .await
            .unwrap();
        assert_eq!(out.envelope.summaries, vec!["Pixel 9 | $499.00 | Acme | https://acme.example/p9"]);
    }

    #[tokio::test]
    async fn artifacts_announced_once_per_session() {
        let config = CapsuleConfig {
            max_artifacts: 1,
            ..Default::default()
        };
        let (compiler, _) = compiler_with(config);
        let bundle = RawOutputBundle::new(vec![
            RawOutput::new("file_read", "h1", "Sheet one totals.").with_blob(ArtifactRef::new("blob-a")),
            RawOutput::new("file_read", "h2", "Sheet two totals.").with_blob(ArtifactRef::new("blob-b")),
        ]);

        let first = compiler
            .compile(CompileRequest::new("s", Ticket::new("t1", "totals"), bundle.clone()))
            .await
            .unwrap();
        assert_eq!(first.capsule.artifacts.len(), 2);
        assert_eq!(first.envelope.artifacts.len(), 1, "capped");

        let second = compiler
            .compile(CompileRequest::new("s", Ticket::new("t2", "totals"), bundle))
            .await
            .unwrap();
        let blobs: Vec<&str> = second.envelope.artifacts.iter().map(|a| a.blob_id.as_str()).collect();
        assert!(!blobs.contains(&first.envelope.artifacts[0].blob_id.as_str()));
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn context_block_is_budgeted_and_read_only() {
        let (compiler, _) = compiler_with(CapsuleConfig {
            context_budget_tokens: 20,
            ..Default::default()
        });
        let context = SessionContext {
            summary: "The user compares phones. ".repeat(20),
            recent_turns: vec![],
            preferences: vec![],
        };
        let req = CompileRequest::new("s", Ticket::new("t1", "phones"), research_bundle(1))
            .with_context(context.clone());
        let out = compiler.compile(req).await.unwrap();
        let block = out.envelope.context_block.unwrap();
        assert!(estimate_tokens(&block) <= 20);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (compiler, store) = compiler_with(CapsuleConfig::default());
        let (a, b) = tokio::join!(
            compiler.compile(CompileRequest::new("a", Ticket::new("t1", "tokio"), research_bundle(2))),
            compiler.compile(CompileRequest::new("b", Ticket::new("t1", "tokio"), research_bundle(2))),
        );
        assert_eq!(a.unwrap().delta.claims.len(), 2);
        assert_eq!(b.unwrap().delta.claims.len(), 2);
        assert_eq!(store.count(None).await.unwrap(), 4);
        assert!(compiler.session_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn summary_falls_back_to_statement() {
        let claim = Claim::new("s", "t", "A plain statement", vec![], Confidence::Low, 60);
        assert_eq!(summary_line(&claim), "A plain statement");
    }
}
