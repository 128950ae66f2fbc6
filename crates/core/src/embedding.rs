//! Embedding trait: text to vector, used for semantic cache fallback.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// An embedding service.
///
/// Failures are never fatal to callers: the tool cache degrades to
/// exact-key lookups when `embed` errors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The embedder name (e.g., "hash", "remote").
    fn name(&self) -> &str;

    /// Embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}
