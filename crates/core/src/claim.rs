//! Claims: durable, fingerprinted statements with evidence and an expiry.
//!
//! A claim's identity is derived from its content: the fingerprint is a
//! SHA-256 over the normalized statement and the sorted evidence handles,
//! and the claim id is a prefix of that fingerprint. Re-recording identical
//! content therefore always lands on the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::freshness;

/// How much the pipeline trusts a statement.
///
/// Variants are ordered: `Low < Medium < High < Verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
    Verified,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::Verified => "verified",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            "verified" => Ok(Confidence::Verified),
            other => Err(format!("unknown confidence level: {other}")),
        }
    }
}

/// Reference to a content-addressed blob (spreadsheet, export, screenshot...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Content address of the blob.
    pub blob_id: String,

    /// MIME type or short kind tag ("xlsx", "csv", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ArtifactRef {
    pub fn new(blob_id: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.into(),
            kind: None,
            label: None,
        }
    }
}

/// Quality sub-scores recorded when a claim is selected into a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityScores {
    pub intent_alignment: f64,
    pub evidence: f64,
    pub specificity: f64,
    pub overall: f64,
}

/// Structured claim metadata.
///
/// Known fields are typed; anything else the extractors attach (prices,
/// urls, diagnostic flags) lands in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimMetadata {
    /// Selection score from the most recent compile.
    #[serde(default)]
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScores>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tool: Option<String>,

    #[serde(default)]
    pub archived: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ClaimMetadata {
    /// Whether this claim is a synthetic zero-result diagnostic.
    pub fn is_zero_results(&self) -> bool {
        self.extra
            .get("zero_results")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A persisted, fingerprinted statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub session_id: String,
    /// Ticket that produced or most recently touched this claim.
    pub ticket_id: String,
    pub statement: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub confidence: Confidence,
    pub fingerprint: String,
    pub last_verified: DateTime<Utc>,
    pub ttl_seconds: i64,
    /// `None` when a persisted timestamp could not be parsed; such claims
    /// are never treated as expired.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: ClaimMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// Build a claim verified now, deriving fingerprint, id and expiry.
    pub fn new(
        session_id: impl Into<String>,
        ticket_id: impl Into<String>,
        statement: impl Into<String>,
        evidence: Vec<String>,
        confidence: Confidence,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        let statement = statement.into();
        let fp = fingerprint(&statement, &evidence);
        Self {
            claim_id: claim_id_for(&fp),
            session_id: session_id.into(),
            ticket_id: ticket_id.into(),
            statement,
            evidence,
            confidence,
            fingerprint: fp,
            last_verified: now,
            ttl_seconds,
            expires_at: Some(freshness::expiry_timestamp(now, ttl_seconds)),
            metadata: ClaimMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: ClaimMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Recompute fingerprint and claim id from the current content.
    ///
    /// Stores call this before persisting so a caller can never write a row
    /// whose identity disagrees with its statement and evidence.
    pub fn refresh_identity(&mut self) {
        self.fingerprint = fingerprint(&self.statement, &self.evidence);
        self.claim_id = claim_id_for(&self.fingerprint);
    }

    /// True when `expires_at` is known and lies at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_archived(&self) -> bool {
        self.metadata.archived
    }

    /// Whether `other` carries different content than `self`.
    ///
    /// Only content fields participate; timestamps and scores do not.
    pub fn content_differs(&self, other: &Claim) -> bool {
        self.fingerprint != other.fingerprint
            || self.confidence != other.confidence
            || self.statement != other.statement
            || self.evidence != other.evidence
    }
}

impl Claim {
    /// Re-derivation of unchanged content over `existing`.
    ///
    /// Returns the row to write when the stored copy is archived or carries a
    /// stale score, `None` when nothing needs writing. Identity, timestamps
    /// and expiry stay those of `existing`; a revived claim gets `updated_at = now`.
    pub fn refresh_of(&self, existing: &Claim, now: DateTime<Utc>) -> Option<Claim> {
        let revive = existing.is_archived();
        if !revive && self.metadata.score == existing.metadata.score {
            return None;
        }
        let mut refreshed = existing.clone();
        refreshed.metadata = self.metadata.clone();
        refreshed.metadata.archived = false;
        refreshed.metadata.archived_at = None;
        if revive {
            refreshed.updated_at = now;
        }
        Some(refreshed)
    }
}

/// Normalize a statement for fingerprinting: lowercase, collapsed whitespace.
pub fn normalize_statement(statement: &str) -> String {
    statement
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable content hash over (normalized statement, sorted evidence).
pub fn fingerprint(statement: &str, evidence: &[String]) -> String {
    let mut sorted: Vec<&str> = evidence.iter().map(|e| e.trim()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(normalize_statement(statement).as_bytes());
    for handle in sorted {
        hasher.update([0x1f]);
        hasher.update(handle.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Claim ids are the first 16 hex chars of the fingerprint.
pub fn claim_id_for(fingerprint: &str) -> String {
    let prefix: String = fingerprint.chars().take(16).collect();
    format!("clm_{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_ordered() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert!(Confidence::High < Confidence::Verified);
    }

    #[test]
    fn confidence_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Confidence>().unwrap(), Confidence::High);
        assert!("certain".parse::<Confidence>().is_err());
    }

    #[test]
    fn fingerprint_ignores_case_whitespace_and_evidence_order() {
        let a = fingerprint(
            "Pixel 9  costs $499",
            &["h2".to_string(), "h1".to_string()],
        );
        let b = fingerprint(
            "pixel 9 costs $499 ",
            &["h1".to_string(), "h2".to_string()],
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_evidence() {
        let a = fingerprint("same text", &["h1".to_string()]);
        let b = fingerprint("same text", &["h2".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn claim_id_derives_from_fingerprint() {
        let claim = Claim::new("s1", "t1", "A fact", vec!["h".into()], Confidence::High, 60);
        assert!(claim.claim_id.starts_with("clm_"));
        assert_eq!(claim.claim_id, claim_id_for(&claim.fingerprint));
        assert!(claim.fingerprint.starts_with(&claim.claim_id[4..]));
    }

    #[test]
    fn unknown_expiry_is_never_expired() {
        let mut claim = Claim::new("s", "t", "x", vec![], Confidence::Low, 0);
        assert!(claim.is_expired(Utc::now()));
        claim.expires_at = None;
        assert!(!claim.is_expired(Utc::now()));
    }

    #[test]
    fn refresh_revives_archived_and_updates_score() {
        let now = Utc::now();
        let stored = Claim::new("s", "t", "x", vec![], Confidence::Low, 60);
        let incoming = stored.clone();
        assert!(incoming.refresh_of(&stored, now).is_none());

        let mut archived = stored.clone();
        archived.metadata.archived = true;
        archived.metadata.archived_at = Some(now);
        let revived = incoming.refresh_of(&archived, now).unwrap();
        assert!(!revived.is_archived());
        assert!(revived.metadata.archived_at.is_none());
        assert_eq!(revived.updated_at, now);
        assert_eq!(revived.created_at, stored.created_at);

        let mut rescored = stored.clone();
        rescored.metadata.score = 0.42;
        let refreshed = rescored.refresh_of(&stored, now).unwrap();
        assert_eq!(refreshed.metadata.score, 0.42);
        assert_eq!(refreshed.updated_at, stored.updated_at);
    }

    #[test]
    fn content_differs_ignores_metadata() {
        let a = Claim::new("s", "t", "x", vec![], Confidence::Low, 60);
        let mut b = a.clone();
        b.metadata.score = 0.9;
        assert!(!a.content_differs(&b));
        b.confidence = Confidence::High;
        assert!(a.content_differs(&b));
    }

    #[test]
    fn zero_results_flag_reads_from_extra() {
        let mut meta = ClaimMetadata::default();
        assert!(!meta.is_zero_results());
        meta.extra.insert("zero_results".into(), serde_json::Value::Bool(true));
        assert!(meta.is_zero_results());
    }

    #[test]
    fn metadata_extra_flattens_in_json() {
        let mut meta = ClaimMetadata {
            score: 0.5,
            domain: Some("pricing".into()),
            ..Default::default()
        };
        meta.extra.insert("url".into(), serde_json::json!("https://shop.example/p/1"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["url"], "https://shop.example/p/1");
        assert_eq!(json["domain"], "pricing");

        let back: ClaimMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
