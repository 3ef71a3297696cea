//! Qdrant-backed [`VectorStore`] over its REST API.
//!
//! Two collections: one point per document (named dense vector `v_doc`) and
//! one point per chunk (named dense vector `v_chunk` plus sparse `v_bm25`).
//! Chunk payloads carry `document_id` so an update can clear the old chunk
//! set with a filter delete.
//!
//! Write ordering makes updates atomic for readers without transactions: the
//! document point is deleted first and rewritten last, so search (which joins
//! chunk hits to their document) never surfaces a half-replaced document.
//! A crash mid-write leaves orphan chunks that no join can reach, and the
//! file's inventory row is still pending, so the next batch rewrites them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::VectorStoreConfig;
use crate::models::{ChunkHit, ChunkRecord, DocumentRecord, SparseVector};
use crate::traits::VectorStore;

pub const DOC_VECTOR: &str = "v_doc";
pub const CHUNK_VECTOR: &str = "v_chunk";
pub const SPARSE_VECTOR: &str = "v_bm25";

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    document_collection: String,
    chunk_collection: String,
    dims: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Deserialize)]
struct QueryResult {
    points: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: String,
    payload: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    result: Vec<RetrievedPoint>,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    id: String,
    payload: Option<serde_json::Value>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            document_collection: config.document_collection.clone(),
            chunk_collection: config.chunk_collection.clone(),
            dims,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(&self, response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("vector store {} failed with {}: {}", action, status, body);
        }
        Ok(response)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .context("vector store unreachable")?;
        Ok(response.status().is_success())
    }

    async fn create_collection(&self, name: &str, schema: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/collections/{}", name)))
            .json(&schema)
            .send()
            .await?;
        self.check(response, "collection create").await?;
        Ok(())
    }

    async fn query_chunks(&self, body: serde_json::Value) -> Result<Vec<ChunkHit>> {
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{}/points/query",
                self.chunk_collection
            )))
            .json(&body)
            .send()
            .await?;
        let response = self.check(response, "query").await?;
        let parsed: QueryResponse = response.json().await.context("invalid query response")?;

        let mut hits = Vec::with_capacity(parsed.result.points.len());
        for point in parsed.result.points {
            let payload = point.payload.unwrap_or_default();
            hits.push(ChunkHit {
                chunk_id: point.id,
                document_id: string_field(&payload, "document_id"),
                sequence_index: payload
                    .get("sequence_index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
                text: string_field(&payload, "text"),
            });
        }
        Ok(hits)
    }
}

fn string_field(payload: &serde_json::Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_ready(&self) -> Result<()> {
        if !self.collection_exists(&self.document_collection).await? {
            self.create_collection(
                &self.document_collection,
                json!({
                    "vectors": {
                        DOC_VECTOR: { "size": self.dims, "distance": "Cosine" }
                    },
                    "sparse_vectors": {
                        SPARSE_VECTOR: {}
                    }
                }),
            )
            .await?;
        }

        if !self.collection_exists(&self.chunk_collection).await? {
            self.create_collection(
                &self.chunk_collection,
                json!({
                    "vectors": {
                        CHUNK_VECTOR: { "size": self.dims, "distance": "Cosine" }
                    },
                    "sparse_vectors": {
                        SPARSE_VECTOR: {}
                    }
                }),
            )
            .await?;

            // Keyword index backs the filter delete in replace_document.
            let response = self
                .client
                .put(self.url(&format!("/collections/{}/index", self.chunk_collection)))
                .json(&json!({
                    "field_name": "document_id",
                    "field_schema": "keyword"
                }))
                .send()
                .await?;
            self.check(response, "payload index create").await?;
        }

        Ok(())
    }

    async fn replace_document(
        &self,
        document: &DocumentRecord,
        document_vector: &[f32],
        document_sparse: &SparseVector,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        // Hide the document before touching its chunks.
        self.delete_document_point(&document.id).await?;
        self.delete_chunks_of(&document.id).await?;

        let points: Vec<serde_json::Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "vector": {
                        CHUNK_VECTOR: chunk.dense,
                        SPARSE_VECTOR: {
                            "indices": chunk.sparse.indices,
                            "values": chunk.sparse.values,
                        }
                    },
                    "payload": {
                        "document_id": chunk.document_id,
                        "sequence_index": chunk.sequence_index,
                        "text": chunk.text,
                    }
                })
            })
            .collect();

        if !points.is_empty() {
            let response = self
                .client
                .put(self.url(&format!(
                    "/collections/{}/points?wait=true",
                    self.chunk_collection
                )))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            self.check(response, "chunk upsert").await?;
        }

        // Chunks are durable; now make the document visible again.
        let response = self
            .client
            .put(self.url(&format!(
                "/collections/{}/points?wait=true",
                self.document_collection
            )))
            .json(&json!({
                "points": [{
                    "id": document.id,
                    "vector": {
                        DOC_VECTOR: document_vector,
                        SPARSE_VECTOR: {
                            "indices": document_sparse.indices,
                            "values": document_sparse.values,
                        }
                    },
                    "payload": {
                        "path": document.path,
                        "file_name": document.file_name,
                        "summary": document.summary,
                        "content_hash": document.content_hash,
                        "last_modified": document.last_modified,
                        "chunk_count": document.chunk_count,
                    }
                }]
            }))
            .send()
            .await?;
        self.check(response, "document upsert").await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.delete_document_point(document_id).await?;
        self.delete_chunks_of(document_id).await
    }

    async fn query_dense(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        self.query_chunks(json!({
            "query": vector,
            "using": CHUNK_VECTOR,
            "limit": limit,
            "with_payload": true,
        }))
        .await
    }

    async fn query_sparse(&self, vector: &SparseVector, limit: usize) -> Result<Vec<ChunkHit>> {
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        self.query_chunks(json!({
            "query": {
                "indices": vector.indices,
                "values": vector.values,
            },
            "using": SPARSE_VECTOR,
            "limit": limit,
            "with_payload": true,
        }))
        .await
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{}/points",
                self.document_collection
            )))
            .json(&json!({ "ids": [document_id], "with_payload": true }))
            .send()
            .await?;
        let response = self.check(response, "document lookup").await?;
        let parsed: RetrieveResponse = response
            .json()
            .await
            .context("invalid retrieve response")?;

        let Some(point) = parsed.result.into_iter().next() else {
            return Ok(None);
        };
        let payload = point.payload.unwrap_or_default();

        Ok(Some(DocumentRecord {
            id: point.id,
            path: string_field(&payload, "path"),
            file_name: string_field(&payload, "file_name"),
            summary: string_field(&payload, "summary"),
            content_hash: string_field(&payload, "content_hash"),
            last_modified: payload
                .get("last_modified")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            chunk_count: payload
                .get("chunk_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize,
        }))
    }
}

impl QdrantStore {
    async fn delete_document_point(&self, document_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{}/points/delete?wait=true",
                self.document_collection
            )))
            .json(&json!({ "points": [document_id] }))
            .send()
            .await?;
        self.check(response, "document delete").await?;
        Ok(())
    }

    async fn delete_chunks_of(&self, document_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{}/points/delete?wait=true",
                self.chunk_collection
            )))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "document_id", "match": { "value": document_id } }
                    ]
                }
            }))
            .send()
            .await?;
        self.check(response, "chunk delete").await?;
        Ok(())
    }
}
