//! Collaborator traits: the seams between the indexing core and its external
//! systems.
//!
//! The pipeline and the query engine are written entirely against these four
//! traits, so every external dependency (file store, OCR service, embedding
//! provider, vector database) can be swapped or mocked without touching the
//! core. Production implementations live in [`crate::filestore`],
//! [`crate::ocr`], [`crate::embedding`], and [`crate::vector_store`].

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkHit, ChunkRecord, DocumentRecord, RemoteFile, SparseVector};

/// Embedding task hint: retrieval models distinguish indexing text from
/// query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    Document,
    Query,
}

/// Remote file store holding the source documents.
///
/// Treated as potentially partial and rate limited; a failed download is a
/// per-file failure, never a batch abort. A malformed listing (checked by
/// [`crate::diff::validate_listing`]) fails the batch before per-file work.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// List every file currently in the store with its content hash and
    /// modification time.
    async fn list_files(&self) -> Result<Vec<RemoteFile>>;

    /// Download one file's raw bytes.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;
}

/// OCR / text extraction service.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from a PDF, one string per page.
    async fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Embedding and summarization model provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dense embeddings, one vector of dimensionality [`Embedder::dims`] per
    /// input text, in input order.
    async fn embed_dense(&self, texts: &[String], task: EmbeddingTask) -> Result<Vec<Vec<f32>>>;

    /// Sparse (lexical) embedding. Deterministic and local in the default
    /// implementation path; kept on the trait so tests and alternative
    /// providers control both vector kinds together.
    fn embed_sparse(&self, text: &str) -> SparseVector;

    /// Short natural-language summary of a document's text.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Dense vector dimensionality D.
    fn dims(&self) -> usize;
}

/// Vector database holding documents and chunks with dense + sparse vectors.
///
/// The write contract is atomic from the reader's point of view: a document
/// becomes searchable only once all of its chunks are durably stored, and an
/// update never exposes a mix of old and new chunks joined to the document.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create collections if missing. Idempotent.
    async fn ensure_ready(&self) -> Result<()>;

    /// Replace a document and all of its chunks in one logical write.
    async fn replace_document(
        &self,
        document: &DocumentRecord,
        document_vector: &[f32],
        document_sparse: &SparseVector,
        chunks: &[ChunkRecord],
    ) -> Result<()>;

    /// Remove a document and all of its chunks.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Top `limit` chunks by dense similarity, best first.
    async fn query_dense(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>>;

    /// Top `limit` chunks by sparse (lexical) similarity, best first.
    async fn query_sparse(&self, vector: &SparseVector, limit: usize) -> Result<Vec<ChunkHit>>;

    /// Point lookup of a document by id.
    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>>;
}
