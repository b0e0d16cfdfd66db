//! Reciprocal Rank Fusion for hybrid search.
//!
//! Combines the BM25 lexical ranking and the cosine vector ranking without
//! score normalization:
//!
//! ```text
//! rrf(d) = sum over rankings r of 1 / (k + rank_r(d))
//! ```
//!
//! with `k = 60` and 1-indexed ranks. A document missing from a ranking
//! contributes nothing for that ranking.

use crate::models::MemoryId;
use std::collections::HashMap;

/// The standard RRF dampening constant.
pub const RRF_K: f32 = 60.0;

/// A fused candidate with its provenance in the source rankings.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    /// Candidate memory.
    pub id: MemoryId,
    /// Combined RRF score.
    pub rrf: f32,
    /// 1-indexed rank in the lexical list, when present.
    pub lexical_rank: Option<usize>,
    /// Cosine score from the vector list, when present.
    pub vector_score: Option<f32>,
}

/// Fuses the lexical and vector rankings into one list, best first.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fuse(lexical: &[MemoryId], vector: &[(MemoryId, f32)]) -> Vec<FusedCandidate> {
    let mut fused: HashMap<&MemoryId, FusedCandidate> =
        HashMap::with_capacity(lexical.len() + vector.len());

    for (rank, id) in lexical.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        fused
            .entry(id)
            .and_modify(|c| {
                c.rrf += contribution;
                c.lexical_rank = Some(rank + 1);
            })
            .or_insert_with(|| FusedCandidate {
                id: id.clone(),
                rrf: contribution,
                lexical_rank: Some(rank + 1),
                vector_score: None,
            });
    }

    for (rank, (id, score)) in vector.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        fused
            .entry(id)
            .and_modify(|c| {
                c.rrf += contribution;
                c.vector_score = Some(*score);
            })
            .or_insert_with(|| FusedCandidate {
                id: id.clone(),
                rrf: contribution,
                lexical_rank: None,
                vector_score: Some(*score),
            });
    }

    let mut candidates: Vec<FusedCandidate> = fused.into_values().collect();
    candidates.sort_by(|a, b| b.rrf.partial_cmp(&a.rrf).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}
