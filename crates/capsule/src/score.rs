//! Candidate scoring: relevance, novelty, decision impact and freshness.
//!
//! Pure and synchronous. The seen-URL set lives for one call only, so a URL
//! repeated across compiles is never penalized, only a URL repeated inside
//! the same batch.

use claimcache_core::candidate::Candidate;
use claimcache_core::claim;
use claimcache_core::freshness;
use regex_lite::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

pub const RELEVANCE_WEIGHT: f64 = 0.45;
pub const NOVELTY_WEIGHT: f64 = 0.25;
pub const DECISION_WEIGHT: f64 = 0.20;
pub const FRESHNESS_WEIGHT: f64 = 0.10;

/// Novelty of a candidate whose fingerprint is already active.
pub const KNOWN_NOVELTY: f64 = 0.1;
/// Novelty of a candidate repeating a URL seen earlier in the batch.
pub const DUPLICATE_URL_NOVELTY: f64 = 0.01;

static NUMERIC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+|[$€£¥]|\b(?i:usd|eur|gbp|jpy|chf)\b").ok());

/// The components behind a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub novelty: f64,
    pub decision_impact: f64,
    pub freshness: f64,
    /// The candidate's URL already appeared earlier in the batch.
    pub duplicate_url: bool,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        RELEVANCE_WEIGHT * self.relevance
            + NOVELTY_WEIGHT * self.novelty
            + DECISION_WEIGHT * self.decision_impact
            + FRESHNESS_WEIGHT * self.freshness
    }
}

/// A candidate with its score filled in.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub breakdown: ScoreBreakdown,
}

/// Score `candidates` against `goal` and return them best-first.
///
/// Fills in `score`, `fingerprint` and `ttl_seconds` on each candidate.
/// Ties keep extraction order.
pub fn score_candidates(
    candidates: Vec<Candidate>,
    goal: &str,
    active_fingerprints: &HashSet<String>,
) -> Vec<ScoredCandidate> {
    let goal_vec = term_frequencies(goal);
    let mut seen_urls: HashSet<String> = HashSet::new();

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|mut candidate| {
            let fp = claim::fingerprint(&candidate.text, &candidate.evidence);

            let duplicate_url = candidate
                .normalized_url()
                .is_some_and(|url| !seen_urls.insert(url));
            let novelty = if duplicate_url {
                DUPLICATE_URL_NOVELTY
            } else if active_fingerprints.contains(&fp) {
                KNOWN_NOVELTY
            } else {
                1.0
            };

            let ttl = freshness::resolve_ttl_seconds(candidate.domain.as_deref(), candidate.confidence);
            let breakdown = ScoreBreakdown {
                relevance: cosine(&goal_vec, &term_frequencies(&candidate.text)),
                novelty,
                decision_impact: decision_impact(&candidate),
                freshness: if ttl >= 0 { 1.0 } else { 0.0 },
                duplicate_url,
            };

            candidate.score = breakdown.total();
            candidate.fingerprint = Some(fp);
            candidate.ttl_seconds = Some(ttl);
            ScoredCandidate { candidate, breakdown }
        })
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.candidate.score.total_cmp(&a.candidate.score));
    scored
}

/// 1.0 for text carrying numbers or currency, or pricing-domain candidates.
pub fn decision_impact(candidate: &Candidate) -> f64 {
    let numeric = NUMERIC.as_ref().is_some_and(|re| re.is_match(&candidate.text));
    if numeric || candidate.domain.as_deref() == Some("pricing") {
        1.0
    } else {
        0.3
    }
}

/// Case-folded token counts; tokens are alphanumeric runs.
pub fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *tf.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two sparse vectors; 0 when either is empty.
pub fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::claim::Confidence;

    fn cand(text: &str) -> Candidate {
        Candidate::new(text, "research.web_search").with_evidence("h1")
    }

    #[test]
    fn cosine_basics() {
        let a = term_frequencies("red shoes");
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&a, &term_frequencies("")), 0.0);
        assert_eq!(cosine(&a, &term_frequencies("blue hats")), 0.0);
    }

    #[test]
    fn relevant_candidate_ranks_first() {
        let scored = score_candidates(
            vec![cand("weather is mild today"), cand("red running shoes on sale")],
            "buy red running shoes",
            &HashSet::new(),
        );
        assert_eq!(scored[0].candidate.text, "red running shoes on sale");
        assert!(scored[0].breakdown.relevance > scored[1].breakdown.relevance);
    }

    #[test]
    fn active_fingerprint_lowers_novelty() {
        let c = cand("known fact");
        let fp = claim::fingerprint(&c.text, &c.evidence);
        let active: HashSet<String> = [fp.clone()].into();
        let scored = score_candidates(vec![c], "goal", &active);
        assert_eq!(scored[0].breakdown.novelty, KNOWN_NOVELTY);
        assert_eq!(scored[0].candidate.fingerprint.as_deref(), Some(fp.as_str()));
    }

    #[test]
    fn duplicate_url_in_batch_is_suppressed() {
        let a = cand("first listing").with_meta("url", "https://shop.example/x");
        let b = cand("second listing").with_meta("url", "HTTPS://shop.example/x ");
        let scored = score_candidates(vec![a, b], "", &HashSet::new());
        let second = scored.iter().find(|s| s.candidate.text == "second listing").unwrap();
        let first = scored.iter().find(|s| s.candidate.text == "first listing").unwrap();
        assert_eq!(first.breakdown.novelty, 1.0);
        assert_eq!(second.breakdown.novelty, DUPLICATE_URL_NOVELTY);
        assert!(second.breakdown.duplicate_url && !first.breakdown.duplicate_url);
        assert!(second.candidate.score < first.candidate.score);
    }

    #[test]
    fn seen_urls_reset_per_call() {
        let a = cand("listing").with_meta("url", "https://shop.example/x");
        let first = score_candidates(vec![a.clone()], "", &HashSet::new());
        let second = score_candidates(vec![a], "", &HashSet::new());
        assert_eq!(first[0].breakdown.novelty, second[0].breakdown.novelty);
    }

    #[test]
    fn decision_impact_rules() {
        assert_eq!(decision_impact(&cand("costs 20 dollars")), 1.0);
        assert_eq!(decision_impact(&cand("priced in EUR")), 1.0);
        assert_eq!(decision_impact(&cand("about $ amounts")), 1.0);
        assert_eq!(decision_impact(&cand("cheap").with_domain("pricing")), 1.0);
        assert_eq!(decision_impact(&cand("plain words")), 0.3);
    }

    #[test]
    fn ties_keep_extraction_order() {
        let scored = score_candidates(vec![cand("alpha"), cand("beta"), cand("gamma")], "", &HashSet::new());
        let order: Vec<&str> = scored.iter().map(|s| s.candidate.text.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn fills_ttl_from_freshness() {
        let c = cand("x").with_confidence(Confidence::High).with_domain("pricing");
        let scored = score_candidates(vec![c], "", &HashSet::new());
        assert_eq!(scored[0].candidate.ttl_seconds, Some(freshness::DAY_SECS));
        assert_eq!(scored[0].breakdown.freshness, 1.0);
    }
}
