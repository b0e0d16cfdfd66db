//! Deterministic token-hash embedder.

// Token hashes index into a fixed-dimension vector; truncation is the point.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use super::Embedder;
use crate::Result;
use sha2::{Digest, Sha256};

/// Embedder that hashes tokens into a fixed-dimension bag-of-words vector.
///
/// Not a semantic model: texts sharing tokens get high cosine similarity,
/// disjoint texts get near zero. That is enough for the lexical-adjacent
/// duties the core assigns to a degraded embedder, and it is fully
/// deterministic, which the test suite relies on.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates an embedder with the given dimensionality.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn token_index(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(raw) as usize) % self.dimensions
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(1536)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.token_index(token)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
