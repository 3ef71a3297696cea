//! Fixed-window overlapping text chunker.
//!
//! Splits document text into windows of `chunk_size` characters where
//! consecutive windows share exactly `overlap` characters. The final window
//! may be shorter. Boundaries are computed over characters, not bytes, so
//! multi-byte text never splits inside a code point.
//!
//! Chunking is deterministic: identical text and configuration always produce
//! identical boundaries. Chunk ids are derived from (document id, sequence
//! index), so this determinism is load-bearing for in-place re-indexing.

use anyhow::Result;

use crate::error::Error;

/// Split `text` into overlapping windows.
///
/// Returns one string per chunk in sequence order, covering the entire input
/// with no gaps. Empty input yields an empty sequence.
///
/// # Errors
///
/// `InvalidConfig` when `chunk_size` is zero or `overlap >= chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(Error::invalid_config("chunk_size must be > 0").into());
    }
    if overlap >= chunk_size {
        return Err(Error::invalid_config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        ))
        .into());
    }

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n_chars = offsets.len();
    if n_chars == 0 {
        return Ok(Vec::new());
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(n_chars / step + 1);
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(n_chars);
        let byte_start = offsets[start];
        let byte_end = if end == n_chars {
            text.len()
        } else {
            offsets[end]
        };
        chunks.push(text[byte_start..byte_end].to_string());

        if end == n_chars {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
