//! Candidate extraction: raw tool outputs to unscored candidates.
//!
//! Each output is dispatched once on its [`ToolKind`]. Extractors are pure
//! functions: no I/O, no `.await`. A malformed item inside an output is
//! skipped and the rest of the batch continues.

mod commerce;
mod diagnostics;
mod document;
mod generic;
mod research;

use claimcache_core::bundle::{RawOutput, RawOutputBundle, ToolKind, ToolRecord};
use claimcache_core::candidate::Candidate;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

pub use diagnostics::suggest_refinement;

/// Offers examined per commerce call; skipped ones are not replaced.
pub const COMMERCE_LIMIT: usize = 6;
/// Hits examined per research call.
pub const RESEARCH_LIMIT: usize = 8;
/// Maximum statements taken from one document read.
pub const DOCUMENT_LIMIT: usize = 6;

/// Extract candidates from every output in a bundle, in bundle order.
pub fn extract_bundle(bundle: &RawOutputBundle) -> Vec<Candidate> {
    bundle.outputs.iter().flat_map(extract_output).collect()
}

/// Extract candidates from a single tool output.
pub fn extract_output(output: &RawOutput) -> Vec<Candidate> {
    let kind = output.tool_kind();
    let candidates = match kind {
        ToolKind::Commerce => commerce::extract(output),
        ToolKind::Research => research::extract(output),
        ToolKind::Document => document::extract(output),
        ToolKind::Generic => generic::extract(output),
    };
    debug!(
        tool = %output.tool_name,
        kind = ?kind,
        candidates = candidates.len(),
        "Extracted candidates"
    );
    candidates
}

/// Diagnostics for empty commerce/research calls the bundle never saw.
///
/// A tool record whose response lists no results, and for which the bundle
/// holds no output from the same tool and query, still yields one
/// zero-result candidate. Records are deduplicated by tool and query.
pub fn extract_records(records: &[ToolRecord], bundle: &RawOutputBundle) -> Vec<Candidate> {
    let covered: HashSet<(String, Option<String>)> = bundle
        .outputs
        .iter()
        .map(|o| (o.tool_name.clone(), query_of(o)))
        .collect();
    let mut seen = HashSet::new();

    records
        .iter()
        .filter_map(|record| {
            let kind = record.tool_kind();
            let keys: &[&str] = match kind {
                ToolKind::Commerce => &["offers", "results", "products"],
                ToolKind::Research => &["results", "hits", "items"],
                _ => return None,
            };
            let output = record_output(record);
            if !items_of(&output, keys).is_some_and(<[Value]>::is_empty) {
                return None;
            }
            let key = (record.tool_name.clone(), query_of(&output));
            if covered.contains(&key) || !seen.insert(key) {
                return None;
            }
            debug!(tool = %record.tool_name, "Empty tool record without bundle output");
            Some(diagnostics::zero_results(&output, kind, vec![]))
        })
        .collect()
}

/// View a record as a raw output: response fields plus the query from args.
fn record_output(record: &ToolRecord) -> RawOutput {
    let mut metadata = match &record.response {
        Value::Object(map) => map.clone(),
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert("results".into(), Value::Array(items.clone()));
            map
        }
        _ => Map::new(),
    };
    for key in ["query", "q", "search", "keywords"] {
        if let Some(value) = record.args.get(key) {
            metadata.entry(key).or_insert_with(|| value.clone());
        }
    }

    let view = RawOutput::new(&record.tool_name, "", "").with_metadata(Value::Object(metadata));
    let handle = match query_of(&view) {
        Some(q) => format!("record:{}:{q}", record.tool_name),
        None => format!("record:{}", record.tool_name),
    };
    RawOutput { handle, ..view }
}

// ── Shared helpers ──────────────────────────────────────────────────────

/// The attempted query, if the tool reported one.
pub(crate) fn query_of(output: &RawOutput) -> Option<String> {
    ["query", "q", "search", "keywords"]
        .iter()
        .find_map(|k| output.metadata.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First array found under any of `keys`.
///
/// `Some(&[])` means the tool answered with an explicitly empty list;
/// `None` means no list was reported at all.
pub(crate) fn items_of<'a>(output: &'a RawOutput, keys: &[&str]) -> Option<&'a [Value]> {
    if let Value::Array(items) = &output.metadata {
        return Some(items.as_slice());
    }
    keys.iter()
        .find_map(|k| output.metadata.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
}

/// Reported issues (warnings, rejections) as plain strings.
pub(crate) fn issues_of(output: &RawOutput) -> Vec<String> {
    let Some(list) = output.metadata.get("issues").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o
                .get("reason")
                .or_else(|| o.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Non-empty trimmed string field of a JSON object.
pub(crate) fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::claim::Confidence;
    use serde_json::json;

    fn record(tool: &str, args: Value, response: Value) -> ToolRecord {
        ToolRecord {
            tool_name: tool.into(),
            args,
            response,
        }
    }

    #[test]
    fn empty_record_without_output_yields_diagnostic() {
        let records = vec![
            record("commerce.search_offers", json!({"query": "usb-c hub"}), json!({"offers": []})),
            record("commerce.search_offers", json!({"query": "usb-c hub"}), json!({"offers": []})),
            record("web_search", json!({"q": "rust"}), json!({"results": [{"title": "x"}]})),
            record("calculator", json!({}), json!({"results": []})),
        ];
        let out = extract_records(&records, &RawOutputBundle::default());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_diagnostic());
        assert_eq!(out[0].meta_str("query"), Some("usb-c hub"));
        assert_eq!(out[0].evidence, vec!["record:commerce.search_offers:usb-c hub"]);
    }

    #[test]
    fn record_covered_by_bundle_output_is_skipped() {
        let bundle = RawOutputBundle::new(vec![
            RawOutput::new("commerce.search_offers", "h1", "")
                .with_metadata(json!({"query": "usb-c hub", "offers": []})),
        ]);
        let records = vec![record(
            "commerce.search_offers",
            json!({"query": "usb-c hub"}),
            json!({"offers": []}),
        )];
        assert!(extract_records(&records, &bundle).is_empty());
    }

    #[test]
    fn dispatches_on_kind() {
        let bundle = RawOutputBundle::new(vec![
            RawOutput::new("commerce.search_offers", "h1", "").with_metadata(json!({
                "query": "usb-c charger",
                "offers": [{"title": "Anker 65W", "price": 39.99, "currency": "USD", "vendor": "Anker"}]
            })),
            RawOutput::new("calculator", "h2", "2 + 2 = 4"),
        ]);
        let out = extract_bundle(&bundle);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].domain.as_deref(), Some("pricing"));
        assert_eq!(out[1].confidence, Confidence::Low);
    }

    #[test]
    fn top_level_array_counts_as_items() {
        let out = RawOutput::new("web_search", "h", "").with_metadata(json!([]));
        assert_eq!(items_of(&out, &["hits"]).map(<[Value]>::len), Some(0));
    }

    #[test]
    fn issues_accept_strings_and_objects() {
        let out = RawOutput::new("shop", "h", "").with_metadata(json!({
            "issues": ["rate limited", {"reason": "accessory"}, 7]
        }));
        assert_eq!(issues_of(&out), vec!["rate limited", "accessory"]);
    }

    #[test]
    fn query_falls_back_through_aliases() {
        let out = RawOutput::new("web_search", "h", "").with_metadata(json!({"q": " rust async "}));
        assert_eq!(query_of(&out).as_deref(), Some("rust async"));
    }
}
