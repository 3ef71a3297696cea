//! Core data models used throughout docdex.
//!
//! These types represent the files, documents, chunks, and search results that
//! flow through the indexing and retrieval pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One entry of a fresh remote file-store listing.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Store-relative path; the inventory key.
    pub path: String,
    /// Hex digest of the file content. The sole change signal.
    pub content_hash: String,
    /// Unix seconds.
    pub last_modified: i64,
}

/// Processing status of a known file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryStatus {
    Pending,
    Processed,
    Failed,
    /// Remote file disappeared; record kept as a tombstone.
    Deleted,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Pending => "pending",
            InventoryStatus::Processed => "processed",
            InventoryStatus::Failed => "failed",
            InventoryStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InventoryStatus::Pending),
            "processed" => Some(InventoryStatus::Processed),
            "failed" => Some(InventoryStatus::Failed),
            "deleted" => Some(InventoryStatus::Deleted),
            _ => None,
        }
    }
}

/// Durable record of a known remote file. Keyed by path; one per file.
/// Never physically deleted on remote deletion, only tombstoned.
#[derive(Debug, Clone)]
pub struct InventoryRecord {
    pub path: String,
    pub content_hash: String,
    pub last_modified: i64,
    pub status: InventoryStatus,
    /// Name of the pipeline stage that failed, when status is `Failed`.
    pub failed_stage: Option<String>,
}

/// Result of diffing a fresh listing against the inventory.
///
/// The three named sets are disjoint by construction; `unchanged` completes
/// the partition of the fresh listing.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<RemoteFile>,
    pub updated: Vec<RemoteFile>,
    /// Paths known to the inventory but absent from the fresh listing.
    pub deleted: Vec<String>,
    pub unchanged: Vec<RemoteFile>,
}

/// Sparse (lexical) vector: parallel term-index and weight arrays, the wire
/// shape Qdrant uses for sparse named vectors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Searchable document record, one per source file. Written by the indexing
/// pipeline, read-only to the query engine.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Stable id derived from the file path, see [`document_id`].
    pub id: String,
    pub path: String,
    pub file_name: String,
    pub summary: String,
    pub content_hash: String,
    pub last_modified: i64,
    pub chunk_count: usize,
}

/// One chunk of a document's text, the unit of vector indexing.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Stable id derived from (document id, sequence index), see [`chunk_id`].
    pub id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

/// A chunk returned from one similarity retrieval, before fusion.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
}

/// A ranked search result at document granularity. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub path: String,
    pub file_name: String,
    pub summary: String,
    pub score: f64,
    pub best_chunk_id: String,
    pub snippet: String,
    pub last_modified: i64,
}

/// Derive the stable document id for a file path.
///
/// First 16 bytes of SHA-256 over the path, rendered as a UUID so the id is
/// accepted as a vector-store point id. Identical paths always map to the
/// same id, which is what makes re-indexing an in-place replace.
pub fn document_id(path: &str) -> String {
    uuid_from_digest(&[path.as_bytes()])
}

/// Derive the stable chunk id for (document id, sequence index).
pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
    uuid_from_digest(&[
        document_id.as_bytes(),
        &(sequence_index as u64).to_le_bytes(),
    ])
}

fn uuid_from_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}
