//! Research hits: one candidate per search result.

use claimcache_core::bundle::{RawOutput, ToolKind};
use claimcache_core::candidate::Candidate;
use claimcache_core::claim::Confidence;
use tracing::debug;

use super::{RESEARCH_LIMIT, diagnostics, generic, items_of, query_of, str_field};

/// Snippets longer than this are cut at a word boundary.
const MAX_SNIPPET_CHARS: usize = 280;

pub(crate) fn extract(output: &RawOutput) -> Vec<Candidate> {
    let Some(hits) = items_of(output, &["results", "hits", "items"]) else {
        if output.summary.trim().is_empty() {
            return vec![diagnostics::zero_results(output, ToolKind::Research, vec![])];
        }
        return generic::extract(output)
            .into_iter()
            .map(|c| c.with_domain("research").with_topic("research"))
            .collect();
    };

    let query = query_of(output);
    let mut candidates = Vec::new();

    for hit in hits.iter().take(RESEARCH_LIMIT) {
        let title = str_field(hit, "title");
        let snippet = ["snippet", "summary", "description"]
            .iter()
            .find_map(|k| str_field(hit, k))
            .map(|s| clip(s, MAX_SNIPPET_CHARS));

        let text = match (title, &snippet) {
            (Some(t), Some(s)) => format!("{t}: {s}"),
            (Some(t), None) => t.to_string(),
            (None, Some(s)) => s.clone(),
            (None, None) => {
                debug!(tool = %output.tool_name, "Skipping malformed hit");
                continue;
            }
        };

        let mut candidate = Candidate::new(text, &output.tool_name)
            .with_evidence(&output.handle)
            .with_confidence(Confidence::Medium)
            .with_domain("research")
            .with_topic("research")
            .with_artifact(output.blob.clone());
        for (key, value) in [
            ("title", title),
            ("url", str_field(hit, "url").or_else(|| str_field(hit, "link"))),
            ("source", str_field(hit, "source")),
            ("published", str_field(hit, "published")),
            ("query", query.as_deref()),
        ] {
            if let Some(value) = value {
                candidate = candidate.with_meta(key, value);
            }
        }
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        return vec![diagnostics::zero_results(output, ToolKind::Research, vec![])];
    }
    candidates
}

/// Cut `text` to at most `max` bytes, backing off to the last whitespace.
fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let head = &text[..end];
    let head = head.rfind(char::is_whitespace).map_or(head, |i| &head[..i]);
    format!("{}...", head.trim_end())
}
