//! Quality signals: per-claim retention scores and the commerce result report.

use claimcache_core::bundle::ToolRecord;
use claimcache_core::capsule::{QualityReport, QueryRefinement};
use claimcache_core::claim::QualityScores;
use serde_json::Value;
use std::collections::BTreeMap;

// ── Claim quality ───────────────────────────────────────────────────────

/// Score a selected claim for retention.
///
/// `relevance` is the scorer's goal alignment; evidence saturates at three
/// handles; specificity grows with statement length.
pub fn claim_quality(relevance: f64, evidence_count: usize, statement: &str) -> QualityScores {
    let intent_alignment = if relevance.is_nan() {
        0.0
    } else {
        relevance.clamp(0.0, 1.0)
    };
    let evidence = match evidence_count {
        0 => 0.0,
        1 => 0.5,
        2 => 0.75,
        _ => 1.0,
    };
    let specificity = match statement.trim().chars().count() {
        0..20 => 0.2,
        20..60 => 0.5,
        60..200 => 0.8,
        _ => 1.0,
    };
    QualityScores {
        intent_alignment,
        evidence,
        specificity,
        overall: 0.5 * intent_alignment + 0.25 * evidence + 0.25 * specificity,
    }
}

// ── Commerce report ─────────────────────────────────────────────────────

/// Build the result-quality report for the commerce records of a ticket.
///
/// Returns `None` when no commerce record exists. Responses are read
/// leniently: `offers` and `rejected` arrays, with optional `total_fetched`
/// and `verified` counts overriding the derived ones.
pub fn quality_report(records: &[ToolRecord], threshold: f64) -> Option<QualityReport> {
    let commerce: Vec<&ToolRecord> = records
        .iter()
        .filter(|r| r.tool_kind().is_commerce())
        .collect();
    if commerce.is_empty() {
        return None;
    }

    let mut total_fetched = 0usize;
    let mut verified = 0usize;
    let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();

    for record in commerce {
        let response = &record.response;
        let offers = array_len(response, "offers");
        let rejected = response
            .get("rejected")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for item in rejected {
            let reason = item
                .get("reason")
                .and_then(Value::as_str)
                .or_else(|| item.as_str())
                .map(normalize_reason)
                .unwrap_or_else(|| "unknown".to_string());
            *breakdown.entry(reason).or_insert(0) += 1;
        }

        total_fetched += count_field(response, "total_fetched").unwrap_or(offers + rejected.len());
        verified += count_field(response, "verified").unwrap_or(offers);
    }

    let quality_score = if total_fetched == 0 {
        0.0
    } else {
        (verified as f64 / total_fetched as f64).min(1.0)
    };

    let suggested_refinement = (quality_score < threshold).then(|| {
        let dominant = breakdown
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(reason, _)| reason.as_str())
            .unwrap_or("no_results");
        refinement_for(dominant)
    });

    Some(QualityReport {
        total_fetched,
        verified,
        quality_score,
        rejection_breakdown: breakdown,
        suggested_refinement,
    })
}

/// Keyword changes for a dominant rejection reason.
pub fn refinement_for(reason: &str) -> QueryRefinement {
    let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
    let (add, negative, hint): (&[&str], &[&str], &str) = match reason {
        r if r.contains("accessor") => (
            &[],
            &["-case", "-cover", "-charger"],
            "exclude accessories so the main product ranks first",
        ),
        r if r.contains("refurb") || r.contains("used") => (
            &["new"],
            &["-refurbished", "-used"],
            "ask for new condition explicitly",
        ),
        r if r.contains("stock") || r.contains("unavailable") => (
            &["in stock"],
            &[],
            "restrict to items that can ship now",
        ),
        r if r.contains("book") || r.contains("media") => (
            &[],
            &["-book", "-poster", "-toy"],
            "exclude media and merchandise listings",
        ),
        r if r.contains("price") || r.contains("budget") => (
            &[],
            &[],
            "widen the price range or drop the budget filter",
        ),
        "no_results" => (&[], &[], "broaden the query or try a more general category"),
        _ => (&[], &[], "add the exact model or brand to the query"),
    };
    QueryRefinement {
        dominant_reason: reason.to_string(),
        add_keywords: owned(add),
        negative_keywords: owned(negative),
        hint: hint.to_string(),
    }
}

fn normalize_reason(reason: &str) -> String {
    reason
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn array_len(value: &Value, key: &str) -> usize {
    value.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

fn count_field(value: &Value, key: &str) -> Option<usize> {
    value.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tool: &str, response: Value) -> ToolRecord {
        ToolRecord {
            tool_name: tool.into(),
            args: json!({}),
            response,
        }
    }

    #[test]
    fn claim_quality_components() {
        let q = claim_quality(0.8, 2, "A statement that is reasonably specific and long.");
        assert_eq!(q.evidence, 0.75);
        assert_eq!(q.specificity, 0.5);
        assert!((q.overall - (0.4 + 0.1875 + 0.125)).abs() < 1e-9);

        let q = claim_quality(f64::NAN, 0, "");
        assert_eq!(q.intent_alignment, 0.0);
        assert_eq!(q.specificity, 0.2);
    }

    #[test]
    fn no_commerce_records_no_report() {
        assert!(quality_report(&[record("web_search", json!({}))], 0.5).is_none());
        assert!(quality_report(&[], 0.5).is_none());
    }

    #[test]
    fn report_counts_and_dominant_reason() {
        let records = vec![record(
            "commerce.search_offers",
            json!({
                "offers": [{"title": "A"}],
                "rejected": [
                    {"reason": "Accessory"},
                    {"reason": "accessory"},
                    {"reason": "out of stock"}
                ]
            }),
        )];
        let report = quality_report(&records, 0.5).unwrap();
        assert_eq!(report.total_fetched, 4);
        assert_eq!(report.verified, 1);
        assert_eq!(report.quality_score, 0.25);
        assert_eq!(report.rejection_breakdown["accessory"], 2);
        assert_eq!(report.rejection_breakdown["out_of_stock"], 1);

        let refinement = report.suggested_refinement.unwrap();
        assert_eq!(refinement.dominant_reason, "accessory");
        assert_eq!(refinement.negative_keywords, vec!["-case", "-cover", "-charger"]);
    }

    #[test]
    fn explicit_counts_win() {
        let records = vec![record(
            "purchasing.lookup",
            json!({"offers": [], "total_fetched": 10, "verified": 8}),
        )];
        let report = quality_report(&records, 0.5).unwrap();
        assert_eq!(report.quality_score, 0.8);
        assert!(report.suggested_refinement.is_none());
    }

    #[test]
    fn empty_fetch_scores_zero_and_suggests_broadening() {
        let report = quality_report(&[record("shop", json!({"offers": []}))], 0.5).unwrap();
        assert_eq!(report.total_fetched, 0);
        assert_eq!(report.quality_score, 0.0);
        assert_eq!(report.suggested_refinement.unwrap().dominant_reason, "no_results");
    }

    #[test]
    fn refinement_mapping() {
        assert_eq!(refinement_for("refurbished").add_keywords, vec!["new"]);
        assert_eq!(refinement_for("out_of_stock").add_keywords, vec!["in stock"]);
        assert!(refinement_for("book").negative_keywords.contains(&"-book".to_string()));
        assert!(refinement_for("weird").add_keywords.is_empty());
    }
}
