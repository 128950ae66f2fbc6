//! Zero-result diagnostics.
//!
//! A search that legitimately returns nothing is still a fact the pipeline
//! needs: it tells the planner to stop repeating the query and how to
//! change it.

use claimcache_core::bundle::{RawOutput, ToolKind};
use claimcache_core::candidate::{Candidate, SEARCH_QUALITY_DOMAIN};
use claimcache_core::claim::Confidence;
use serde_json::Value;

use super::{issues_of, query_of};

/// Build the single diagnostic candidate for an empty commerce/research call.
pub(crate) fn zero_results(output: &RawOutput, kind: ToolKind, extra_issues: Vec<String>) -> Candidate {
    let query = query_of(output);
    let mut issues = issues_of(output);
    issues.extend(extra_issues);
    let refinement = suggest_refinement(query.as_deref(), &issues);

    let text = match &query {
        Some(q) => format!("{} returned no results for \"{q}\"", output.tool_name),
        None => format!("{} returned no results", output.tool_name),
    };

    Candidate::new(text, &output.tool_name)
        .with_evidence(&output.handle)
        .with_confidence(Confidence::High)
        .with_domain(SEARCH_QUALITY_DOMAIN)
        .with_topic("zero_results")
        .with_topic("diagnostics")
        .with_meta("zero_results", true)
        .with_meta("tool_kind", serde_json::to_value(kind).unwrap_or(Value::Null))
        .with_meta("query", query.map(Value::String).unwrap_or(Value::Null))
        .with_meta("issues", issues)
        .with_meta("suggested_refinement", refinement)
}

/// A one-line suggestion for rewriting a query that found nothing.
pub fn suggest_refinement(query: Option<&str>, issues: &[String]) -> String {
    let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return "retry with explicit search keywords".to_string();
    };

    let mentions = |needles: &[&str]| {
        issues.iter().any(|i| {
            let i = i.to_lowercase();
            needles.iter().any(|n| i.contains(n))
        })
    };

    if mentions(&["price", "budget", "cost"]) {
        return format!("relax the price limit for \"{query}\"");
    }
    if query.contains('"') {
        return format!("remove exact-phrase quotes from {query}");
    }
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() > 4 {
        return format!("drop qualifiers and try \"{}\"", words[..3].join(" "));
    }
    format!("try a broader category or synonyms for \"{query}\"")
}
