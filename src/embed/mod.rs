// src/embed/mod.rs
// Embedding provider seam plus a deterministic offline implementation.
// Real deployments plug a remote model behind `EmbeddingProvider`; the
// lexical embedder keeps tests and air-gapped runs working without one.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Default dimensionality for the lexical embedder.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider identifier, part of the embedding cache key.
    fn id(&self) -> &str;

    /// Model revision, part of the embedding cache key. Bumping it
    /// invalidates every cached vector from the prior revision.
    fn model_version(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Feature-hashing embedding over tokens: each token hashes to one bucket
/// with a deterministic sign, then the vector is L2-normalized. Not a
/// semantic model, but stable, offline, and good enough for near-duplicate
/// retrieval.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dim: usize,
}

impl LexicalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        if self.dim == 0 {
            return Vec::new();
        }
        let mut vector = vec![0.0f32; self.dim];
        let mut count = 0u32;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = Sha256::new();
            hasher.update(token.to_lowercase().as_bytes());
            let digest = hasher.finalize();

            let mut eight = [0u8; 8];
            eight.copy_from_slice(&digest[..8]);
            let bucket = u64::from_le_bytes(eight);

            let idx = (bucket as usize) % self.dim;
            let sign = if digest[8] & 1 == 0 { 1.0f32 } else { -1.0f32 };
            vector[idx] += sign;
            count = count.saturating_add(1);
        }

        if count == 0 {
            return vector;
        }

        let norm2: f64 = vector.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
        if norm2 > 0.0 {
            let inv = norm2.sqrt().recip() as f32;
            for x in &mut vector {
                *x *= inv;
            }
        }
        vector
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

#[async_trait]
impl EmbeddingProvider for LexicalEmbedder {
    fn id(&self) -> &str {
        "lexical"
    }

    fn model_version(&self) -> &str {
        "lexical-v1"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// Cosine similarity in [-1, 1]. Zero-norm or mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
