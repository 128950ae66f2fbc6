//! Claim evaluator: optional external judgment used by the pruner.
//!
//! An evaluator (typically an LLM call) may reclassify claims before the
//! working-memory cap is applied. It is never required: the default
//! `KeepAllEvaluator` keeps everything, and evaluator errors are treated as
//! `Keep` by the pruner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::claim::Claim;
use crate::error::EvaluatorError;

/// What to do with a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Keep,
    Archive,
    Delete,
}

#[async_trait]
pub trait ClaimEvaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, claim: &Claim) -> std::result::Result<Verdict, EvaluatorError>;
}

/// Default evaluator: keeps every claim.
pub struct KeepAllEvaluator;

#[async_trait]
impl ClaimEvaluator for KeepAllEvaluator {
    fn name(&self) -> &str {
        "keep_all"
    }

    async fn classify(&self, _claim: &Claim) -> std::result::Result<Verdict, EvaluatorError> {
        Ok(Verdict::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::Confidence;

    #[tokio::test]
    async fn keep_all_keeps() {
        let claim = Claim::new("s", "t", "x", vec![], Confidence::Low, 10);
        let verdict = KeepAllEvaluator.classify(&claim).await.unwrap();
        assert_eq!(verdict, Verdict::Keep);
    }
}
