//! Reciprocal Rank Fusion over the dense and sparse retrieval lists.
//!
//! RRF combines ranked lists using only rank positions, which sidesteps the
//! incomparable score scales of cosine similarity and BM25:
//!
//! ```text
//! fused(c) = Σ_lists 1 / (k + rank(c))        rank is 1-based
//! ```
//!
//! A chunk absent from a list contributes nothing for that list. The default
//! smoothing constant k=60 follows Cormack, Clarke and Buettcher (SIGIR 2009).

use std::collections::HashMap;

use crate::models::ChunkHit;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: usize = 60;

/// A chunk with its fused score.
#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub hit: ChunkHit,
    pub score: f64,
}

/// Fuse two ranked chunk lists into one, ordered by fused score descending.
///
/// Equal fused scores are ordered by chunk id ascending so the output is
/// reproducible across runs regardless of hash-map iteration order.
pub fn reciprocal_rank_fusion(dense: &[ChunkHit], sparse: &[ChunkHit], k: usize) -> Vec<FusedChunk> {
    let k = k as f64;
    let mut scores: HashMap<&str, f64> = HashMap::with_capacity(dense.len() + sparse.len());
    let mut hits: HashMap<&str, &ChunkHit> = HashMap::with_capacity(dense.len() + sparse.len());

    for list in [dense, sparse] {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f64);
            *scores.entry(hit.chunk_id.as_str()).or_insert(0.0) += contribution;
            hits.entry(hit.chunk_id.as_str()).or_insert(hit);
        }
    }

    let mut fused: Vec<FusedChunk> = scores
        .into_iter()
        .map(|(chunk_id, score)| FusedChunk {
            hit: (*hits[chunk_id]).clone(),
            score,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });

    fused
}
