//! Raw tool output bundles: the engine's input boundary.
//!
//! Upstream pipeline phases hand over one `RawOutputBundle` per ticket,
//! optionally accompanied by the `ToolRecord`s (args/response pairs) that
//! produced it.

use serde::{Deserialize, Serialize};

use crate::claim::ArtifactRef;

/// The category of tool that produced an output.
///
/// Resolved once per output; extraction dispatches on this discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Product / offer lookups (prices, vendors, availability).
    Commerce,
    /// Web or literature search hits.
    Research,
    /// File and document reads.
    Document,
    /// Anything unmapped.
    Generic,
}

impl ToolKind {
    /// Classify a tool by its registered name.
    pub fn classify(tool_name: &str) -> Self {
        let name = tool_name.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["commerce", "purchas", "offer", "shop", "price", "product"]) {
            ToolKind::Commerce
        } else if has(&["research", "search", "web", "scholar", "news"]) {
            ToolKind::Research
        } else if has(&["file", "doc", "read", "pdf", "spreadsheet"]) {
            ToolKind::Document
        } else {
            ToolKind::Generic
        }
    }

    /// Whether results from this kind of tool count as commerce/pricing.
    pub fn is_commerce(&self) -> bool {
        matches!(self, ToolKind::Commerce)
    }
}

/// A single tool invocation's output as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutput {
    pub tool_name: String,

    /// Opaque handle to the full output (used as claim evidence).
    pub handle: String,

    /// Short text summary of the output.
    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<ArtifactRef>,

    /// Per-tool structured payload (offers, hits, statements, query, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Explicit kind; when absent the tool name is classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
}

impl RawOutput {
    pub fn new(tool_name: impl Into<String>, handle: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            handle: handle.into(),
            summary: summary.into(),
            blob: None,
            metadata: serde_json::Value::Null,
            kind: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_blob(mut self, blob: ArtifactRef) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn with_kind(mut self, kind: ToolKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn tool_kind(&self) -> ToolKind {
        self.kind.unwrap_or_else(|| ToolKind::classify(&self.tool_name))
    }

    /// Approximate size of this output in characters.
    pub fn approx_chars(&self) -> usize {
        let meta = if self.metadata.is_null() {
            0
        } else {
            self.metadata.to_string().len()
        };
        self.summary.len() + meta
    }
}

/// All raw outputs gathered for one ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOutputBundle {
    #[serde(default)]
    pub outputs: Vec<RawOutput>,
}

impl RawOutputBundle {
    pub fn new(outputs: Vec<RawOutput>) -> Self {
        Self { outputs }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn approx_chars(&self) -> usize {
        self.outputs.iter().map(RawOutput::approx_chars).sum()
    }
}

/// An args/response pair recorded for a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub response: serde_json::Value,
}

impl ToolRecord {
    pub fn tool_kind(&self) -> ToolKind {
        ToolKind::classify(&self.tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_tools() {
        assert_eq!(ToolKind::classify("commerce.search_offers"), ToolKind::Commerce);
        assert_eq!(ToolKind::classify("purchasing.lookup"), ToolKind::Commerce);
        assert_eq!(ToolKind::classify("research.web_search"), ToolKind::Research);
        assert_eq!(ToolKind::classify("file_read"), ToolKind::Document);
        assert_eq!(ToolKind::classify("calculator"), ToolKind::Generic);
    }

    #[test]
    fn explicit_kind_wins() {
        let out = RawOutput::new("calculator", "h", "42").with_kind(ToolKind::Research);
        assert_eq!(out.tool_kind(), ToolKind::Research);
    }

    #[test]
    fn bundle_deserializes_with_defaults() {
        let json = r#"{"outputs":[{"tool_name":"web_search","handle":"h1"}]}"#;
        let bundle: RawOutputBundle = serde_json::from_str(json).unwrap();
        assert_eq!(bundle.outputs.len(), 1);
        assert!(bundle.outputs[0].summary.is_empty());
        assert!(bundle.outputs[0].metadata.is_null());
    }
}
