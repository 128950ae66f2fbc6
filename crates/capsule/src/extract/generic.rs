//! Fallback for unmapped tools: the summary as one low-confidence claim.

use claimcache_core::bundle::RawOutput;
use claimcache_core::candidate::Candidate;
use claimcache_core::claim::Confidence;

pub(crate) fn extract(output: &RawOutput) -> Vec<Candidate> {
    let summary = output.summary.trim();
    if summary.is_empty() {
        return Vec::new();
    }
    vec![
        Candidate::new(summary, &output.tool_name)
            .with_evidence(&output.handle)
            .with_confidence(Confidence::Low)
            .with_artifact(output.blob.clone()),
    ]
}
