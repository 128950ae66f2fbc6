//! Built-in embedders.
//!
//! `HashEmbedder` is a deterministic feature-hashing embedder: each
//! lowercase token (and each adjacent token pair) is hashed into a bucket
//! with a sign, and the result is normalized to unit length. Queries that
//! share most of their words land close together, which is all the
//! semantic tool-cache fallback needs. Output is stable across processes,
//! so embeddings can be rebuilt from persisted queries after a restart.

use async_trait::async_trait;
use claimcache_core::embedding::Embedder;
use claimcache_core::error::EmbeddingError;
use sha2::{Digest, Sha256};

use crate::vector;

pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding; the trait method wraps this.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut out = vec![0.0f32; self.dimensions];

        for token in &tokens {
            self.add_feature(&mut out, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut out, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        vector::normalize(&mut out);
        out
    }

    fn add_feature(&self, out: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) % self.dimensions as u64;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        out[bucket as usize] += sign * weight;
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if tokenize(text).is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.embed_text(text))
    }
}

/// An embedder that is always unavailable.
///
/// Used when `embedding.provider = "none"`; semantic lookups degrade to
/// exact-key only.
pub struct NoopEmbedder;

#[async_trait]
impl Embedder for NoopEmbedder {
    fn name(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("no embedding provider configured".into()))
    }
}
