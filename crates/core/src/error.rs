//! Error types for the Claimcache domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Claimcache operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Claim store errors ---
    #[error("Claim store error: {0}")]
    Store(#[from] StoreError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Evaluator errors ---
    #[error("Evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Invalid claim: {0}")]
    InvalidClaim(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Unknown cache layer: {0}")]
    UnknownLayer(String),

    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("Empty input")]
    EmptyInput,
}

#[derive(Debug, Clone, Error)]
pub enum EvaluatorError {
    #[error("Evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("Evaluator returned an unusable verdict: {0}")]
    BadVerdict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_correctly() {
        let err = Error::Store(StoreError::Storage("disk full".into()));
        assert!(err.to_string().contains("Claim store"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn corrupt_cache_entry_names_key() {
        let err = Error::Cache(CacheError::Corrupt {
            key: "tool:web_search:abc".into(),
            reason: "invalid JSON".into(),
        });
        assert!(err.to_string().contains("tool:web_search:abc"));
        assert!(err.to_string().contains("invalid JSON"));
    }
}
