//! Local BM25-style sparse encoding.
//!
//! Produces the lexical counterpart to the dense embedding: a term-weight map
//! where each term maps to a stable u32 index (first four bytes of the term's
//! SHA-256) and a BM25 term-frequency weight. Document frequency is left to
//! the vector store, which applies IDF at query time; this matches how the
//! hosted BM25 sparse models behave.
//!
//! Encoding is fully deterministic and local, so the query path and the
//! indexing path always agree on term indices.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::SparseVector;

/// BM25 term-frequency saturation.
const BM25_K1: f32 = 1.2;
/// BM25 length normalization.
const BM25_B: f32 = 0.75;
/// Assumed average document length in tokens.
const BM25_AVG_LEN: f32 = 256.0;

/// Encode text into a sparse term-weight vector.
///
/// Whitespace-only or empty text encodes to an empty vector. Indices are
/// sorted ascending; colliding term hashes accumulate their weights.
pub fn encode(text: &str) -> SparseVector {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return SparseVector::default();
    }

    let len = tokens.len() as f32;
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokens {
        *counts.entry(token).or_insert(0) += 1;
    }

    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / BM25_AVG_LEN);
    let mut weights: HashMap<u32, f32> = HashMap::with_capacity(counts.len());
    for (token, count) in counts {
        let tf = count as f32;
        let weight = tf * (BM25_K1 + 1.0) / (tf + norm);
        *weights.entry(term_index(&token)).or_insert(0.0) += weight;
    }

    let mut entries: Vec<(u32, f32)> = weights.into_iter().collect();
    entries.sort_by_key(|(idx, _)| *idx);

    SparseVector {
        indices: entries.iter().map(|(idx, _)| *idx).collect(),
        values: entries.iter().map(|(_, w)| *w).collect(),
    }
}

/// Dot product over matching indices. Both inputs must have sorted indices,
/// which [`encode`] guarantees.
pub fn dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut i = 0;
    let mut j = 0;
    let mut sum = 0.0;
    while i < a.indices.len() && j < b.indices.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a.values[i] * b.values[j];
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Lowercased alphanumeric tokens, single-character tokens dropped.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Stable term index: first four bytes of SHA-256, big-endian.
fn term_index(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
