//! Hybrid query engine.
//!
//! One query runs dense and sparse retrieval over chunks, fuses the two lists
//! with RRF, collapses chunks to their documents keeping each document's best
//! fused chunk, joins in the document records, and returns document-level
//! results ordered by fused score.
//!
//! The query path is read only and makes no retries: a collaborator failure
//! surfaces as [`Error::QueryCollaborator`] rather than degraded results.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::Error;
use crate::fusion::{reciprocal_rank_fusion, FusedChunk};
use crate::models::SearchResult;
use crate::traits::{Embedder, EmbeddingTask, VectorStore};

/// Validated per-request parameters.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub query: String,
    pub top_k: usize,
    pub chunk_candidates: usize,
}

impl QueryParams {
    /// Validate raw request inputs against the configured maxima. Absent
    /// values fall back to configured defaults. Out-of-range values are
    /// rejected, not clamped.
    pub fn new(
        config: &RetrievalConfig,
        query: &str,
        top_k: Option<usize>,
        chunk_candidates: Option<usize>,
    ) -> Result<Self> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_config("query must not be empty").into());
        }

        let top_k = top_k.unwrap_or(config.default_top_k);
        if top_k < 1 || top_k > config.top_k_max {
            return Err(Error::invalid_config(format!(
                "top_k must be in 1..={}",
                config.top_k_max
            ))
            .into());
        }

        let chunk_candidates = chunk_candidates.unwrap_or(config.default_chunk_candidates);
        if chunk_candidates < 1 || chunk_candidates > config.chunk_candidates_max {
            return Err(Error::invalid_config(format!(
                "chunk_candidates must be in 1..={}",
                config.chunk_candidates_max
            ))
            .into());
        }

        Ok(Self {
            query: query.to_string(),
            top_k,
            chunk_candidates,
        })
    }
}

pub async fn search_documents(
    config: &RetrievalConfig,
    embedder: &Arc<dyn Embedder>,
    vectors: &Arc<dyn VectorStore>,
    params: &QueryParams,
) -> Result<Vec<SearchResult>> {
    let query_vector = embedder
        .embed_dense(
            std::slice::from_ref(&params.query),
            EmbeddingTask::Query,
        )
        .await
        .map_err(collaborator)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::QueryCollaborator("provider returned no query vector".into()))?;
    let sparse_query = embedder.embed_sparse(&params.query);

    let dense_hits = vectors
        .query_dense(&query_vector, params.chunk_candidates)
        .await
        .map_err(collaborator)?;
    let sparse_hits = vectors
        .query_sparse(&sparse_query, params.chunk_candidates)
        .await
        .map_err(collaborator)?;

    let fused = reciprocal_rank_fusion(&dense_hits, &sparse_hits, config.rrf_k);

    // Collapse to document granularity. Fused order means the first chunk
    // seen for a document is its best one.
    let mut best_per_doc: HashMap<String, FusedChunk> = HashMap::new();
    let mut doc_order: Vec<String> = Vec::new();
    for chunk in fused {
        let doc_id = chunk.hit.document_id.clone();
        if !best_per_doc.contains_key(&doc_id) {
            doc_order.push(doc_id.clone());
            best_per_doc.insert(doc_id, chunk);
        }
    }

    let mut results = Vec::with_capacity(doc_order.len().min(params.top_k));
    for doc_id in doc_order {
        let chunk = &best_per_doc[&doc_id];
        let Some(document) = vectors.get_document(&doc_id).await.map_err(collaborator)? else {
            // A chunk hit without its document is a replace in flight or an
            // orphan from a crashed write. Skip rather than surface half a
            // result.
            tracing::debug!(document_id = %doc_id, "dropping chunk hit with no document");
            continue;
        };

        results.push(SearchResult {
            document_id: document.id,
            path: document.path,
            file_name: document.file_name,
            summary: document.summary,
            score: chunk.score,
            best_chunk_id: chunk.hit.chunk_id.clone(),
            snippet: snippet(&chunk.hit.text, config.snippet_chars),
            last_modified: document.last_modified,
        });
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_modified.cmp(&a.last_modified))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    results.truncate(params.top_k);
    Ok(results)
}

fn collaborator(e: anyhow::Error) -> anyhow::Error {
    Error::QueryCollaborator(format!("{:#}", e)).into()
}

/// Cap snippet text at `max_chars` characters, marking the cut.
fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}
