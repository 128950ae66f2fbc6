//! Candidates: unpersisted facts extracted from one tool output.

use serde::{Deserialize, Serialize};

use crate::claim::{ArtifactRef, Confidence};

/// Domain tag carried by zero-result diagnostics.
pub const SEARCH_QUALITY_DOMAIN: &str = "search_quality";

/// A scored extraction eligible to become a claim.
///
/// Owned by a single compile pass; `score`, `fingerprint` and `ttl_seconds`
/// are filled in by the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,

    #[serde(default)]
    pub evidence: Vec<String>,

    pub source_tool: String,

    #[serde(default)]
    pub confidence: Confidence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default)]
    pub topics: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
}

impl Candidate {
    pub fn new(text: impl Into<String>, source_tool: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            evidence: Vec::new(),
            source_tool: source_tool.into(),
            confidence: Confidence::Medium,
            domain: None,
            topics: Vec::new(),
            artifact: None,
            metadata: serde_json::Map::new(),
            score: 0.0,
            fingerprint: None,
            ttl_seconds: None,
        }
    }

    pub fn with_evidence(mut self, handle: impl Into<String>) -> Self {
        self.evidence.push(handle.into());
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Option<ArtifactRef>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String metadata lookup.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Whether this candidate is a synthetic zero-result diagnostic.
    pub fn is_diagnostic(&self) -> bool {
        self.metadata
            .get("zero_results")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Case-folded, trimmed URL, if the extractor attached one.
    pub fn normalized_url(&self) -> Option<String> {
        let url = self.meta_str("url")?.trim();
        if url.is_empty() {
            None
        } else {
            Some(url.to_lowercase())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let c = Candidate::new("Widget costs $10", "commerce.search_offers")
            .with_evidence("h1")
            .with_domain("pricing")
            .with_topic("commerce")
            .with_meta("url", " HTTPS://Shop.example/Widget ");
        assert_eq!(c.evidence, vec!["h1"]);
        assert_eq!(c.domain.as_deref(), Some("pricing"));
        assert_eq!(c.normalized_url().as_deref(), Some("https://shop.example/widget"));
        assert!(!c.is_diagnostic());
    }

    #[test]
    fn blank_url_is_ignored() {
        let c = Candidate::new("x", "t").with_meta("url", "   ");
        assert!(c.normalized_url().is_none());
    }
}
