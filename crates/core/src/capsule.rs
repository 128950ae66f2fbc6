//! Capsules: the compiled, budget-limited output for one ticket.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::claim::{ArtifactRef, Claim};

/// A unit of work in the upstream pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    /// Goal text used for relevance scoring.
    pub goal: String,
}

impl Ticket {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
        }
    }
}

/// Prior-turn context for a session, read (never written) by the compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Free-form summary carried over from earlier turns.
    #[serde(default)]
    pub summary: String,
    /// Recent user turns, oldest first.
    #[serde(default)]
    pub recent_turns: Vec<String>,
    /// Stated user preferences ("prefers metric units").
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.recent_turns.is_empty() && self.preferences.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    Ok,
    /// No regular candidates were extracted; diagnostics may still be present.
    Empty,
}

/// Approximate raw-input vs selected-output accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub raw_chars: usize,
    pub selected_chars: usize,
    pub raw_tokens: usize,
    pub selected_tokens: usize,
    pub candidates_considered: usize,
    pub claims_selected: usize,
    /// `selected_chars / raw_chars`, 0 when there was no input.
    pub compression_ratio: f64,
}

/// Concrete keyword changes suggested when commerce results are poor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRefinement {
    pub dominant_reason: String,
    #[serde(default)]
    pub add_keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    pub hint: String,
}

/// Result quality of the commerce/pricing tools a ticket touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_fetched: usize,
    pub verified: usize,
    /// `verified / total_fetched`, 0 when nothing was fetched.
    pub quality_score: f64,
    pub rejection_breakdown: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_refinement: Option<QueryRefinement>,
}

/// The compiled capsule for one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    pub session_id: String,
    pub ticket_id: String,
    pub status: CapsuleStatus,
    pub claims: Vec<Claim>,
    pub artifacts: Vec<ArtifactRef>,
    pub caveats: Vec<String>,
    pub open_questions: Vec<String>,
    pub budget: BudgetReport,
}

/// Claims and artifacts that are new or changed relative to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsuleDelta {
    pub claims: Vec<Claim>,
    pub artifacts: Vec<ArtifactRef>,
}

impl CapsuleDelta {
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty() && self.artifacts.is_empty()
    }
}

/// The externally consumed projection of a capsule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleEnvelope {
    pub session_id: String,
    pub ticket_id: String,
    pub status: CapsuleStatus,
    pub claim_ids: Vec<String>,
    pub summaries: Vec<String>,
    pub caveats: Vec<String>,
    pub open_questions: Vec<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub has_delta: bool,
    pub budget: BudgetReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_report: Option<QualityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_block: Option<String>,
}

/// The capped, pruned set of active claims for a session.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemorySnapshot {
    pub claims: Vec<Claim>,
    pub claim_ids: Vec<String>,
    pub by_fingerprint: HashMap<String, Claim>,
}

impl WorkingMemorySnapshot {
    pub fn from_claims(claims: Vec<Claim>) -> Self {
        let claim_ids = claims.iter().map(|c| c.claim_id.clone()).collect();
        let by_fingerprint = claims
            .iter()
            .map(|c| (c.fingerprint.clone(), c.clone()))
            .collect();
        Self {
            claims,
            claim_ids,
            by_fingerprint,
        }
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.by_fingerprint.contains_key(fingerprint)
    }
}
