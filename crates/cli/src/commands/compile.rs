//! `claimcache compile`: turn a raw output bundle into a capsule.

use claimcache_capsule::CompileRequest;
use claimcache_core::bundle::{RawOutput, RawOutputBundle, ToolRecord};
use claimcache_core::capsule::Ticket;
use serde::de::DeserializeOwned;
use std::path::Path;

pub struct CompileArgs {
    pub session: String,
    pub goal: String,
    pub bundle: String,
    pub records: Option<String>,
    pub ticket: Option<String>,
    pub full: bool,
}

pub async fn run(args: CompileArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = load_bundle(Path::new(&args.bundle))?;
    let records: Vec<ToolRecord> = match &args.records {
        Some(path) => read_json(Path::new(path))?,
        None => Vec::new(),
    };
    let ticket_id = args
        .ticket
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let engine = super::open_engine().await?;
    let request = CompileRequest::new(&args.session, Ticket::new(ticket_id, args.goal), bundle)
        .with_records(records);
    let output = engine.compile(request).await?;

    let rendered = if args.full {
        serde_json::to_string_pretty(&output.capsule)?
    } else {
        serde_json::to_string_pretty(&output.envelope)?
    };
    println!("{rendered}");

    Ok(())
}

/// Accepts either `{"outputs": [...]}` or a bare array of outputs.
pub fn load_bundle(path: &Path) -> Result<RawOutputBundle, Box<dyn std::error::Error>> {
    let value: serde_json::Value = read_json(path)?;
    let bundle = if value.is_array() {
        RawOutputBundle::new(serde_json::from_value::<Vec<RawOutput>>(value)?)
    } else {
        serde_json::from_value(value)?
    };
    Ok(bundle)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let parsed = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_wrapped_and_bare_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let output = r#"{"tool_name": "web_search", "handle": "h1", "summary": "two hits"}"#;

        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, format!(r#"{{"outputs": [{output}]}}"#)).unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, format!("[{output}]")).unwrap();

        for path in [wrapped, bare] {
            let bundle = load_bundle(&path).unwrap();
            assert_eq!(bundle.outputs.len(), 1);
            assert_eq!(bundle.outputs[0].handle, "h1");
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_bundle(Path::new("/nonexistent/bundle.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bundle.json"));
    }
}
