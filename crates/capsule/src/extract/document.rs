//! Document reads: explicit statements, else summary sentences.

use claimcache_core::bundle::RawOutput;
use claimcache_core::candidate::Candidate;
use claimcache_core::claim::Confidence;
use serde_json::Value;
use tracing::debug;

use super::{DOCUMENT_LIMIT, items_of, str_field};

pub(crate) fn extract(output: &RawOutput) -> Vec<Candidate> {
    let statements: Vec<String> = match items_of(output, &["statements", "facts"]) {
        Some(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Object(_) => str_field(item, "text").map(str::to_string),
                _ => {
                    debug!(tool = %output.tool_name, "Skipping malformed statement");
                    None
                }
            })
            .take(DOCUMENT_LIMIT)
            .collect(),
        None => sentences(&output.summary)
            .into_iter()
            .take(DOCUMENT_LIMIT)
            .collect(),
    };

    let domain = str_field(&output.metadata, "domain");
    let path = str_field(&output.metadata, "path");

    statements
        .into_iter()
        .map(|text| {
            let mut c = Candidate::new(text, &output.tool_name)
                .with_evidence(&output.handle)
                .with_confidence(Confidence::High)
                .with_topic("document")
                .with_artifact(output.blob.clone());
            if let Some(domain) = domain {
                c = c.with_domain(domain);
            }
            if let Some(path) = path {
                c = c.with_meta("path", path);
            }
            c
        })
        .collect()
}

/// Split prose into sentences on `.`, `!` or `?` followed by whitespace.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|(_, next)| next.is_whitespace()) {
            let end = i + c.len_utf8();
            push_sentence(&mut out, &text[start..end]);
            start = end;
        }
    }
    push_sentence(&mut out, &text[start..]);
    out
}

fn push_sentence(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_statements() {
        let out = RawOutput::new("file_read", "h1", "ignored").with_metadata(json!({
            "path": "specs/widget.md",
            "domain": "spec",
            "statements": ["Max load is 20kg.", {"text": "Rated IP67."}, 4, "  "]
        }));
        let c = extract(&out);
        assert_eq!(c.len(), 2);
        assert_eq!(c[1].text, "Rated IP67.");
        assert_eq!(c[0].domain.as_deref(), Some("spec"));
        assert_eq!(c[0].meta_str("path"), Some("specs/widget.md"));
        assert_eq!(c[0].confidence, Confidence::High);
    }

    #[test]
    fn summary_sentences_capped() {
        let summary = (0..9).map(|i| format!("Fact {i}.")).collect::<Vec<_>>().join(" ");
        let out = RawOutput::new("doc_reader", "h", summary);
        assert_eq!(extract(&out).len(), DOCUMENT_LIMIT);
    }

    #[test]
    fn sentence_split_keeps_decimals() {
        assert_eq!(
            sentences("Version 2.5 is out! Upgrade now? Sure"),
            vec!["Version 2.5 is out!", "Upgrade now?", "Sure"]
        );
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert!(extract(&RawOutput::new("file_read", "h", "  ")).is_empty());
    }
}
