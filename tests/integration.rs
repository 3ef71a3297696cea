//! End-to-end tests over the indexing pipeline and the query engine, with
//! all four collaborators mocked in memory.
//!
//! The mock embedder hashes tokens into a small dense space so that texts
//! sharing words really do score closer, which lets retrieval tests assert
//! on ranking without a model.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docdex::config::Config;
use docdex::db;
use docdex::inventory;
use docdex::models::{
    self, ChunkHit, ChunkRecord, DocumentRecord, InventoryStatus, RemoteFile, SparseVector,
};
use docdex::pipeline::{BatchOptions, Pipeline, Stage};
use docdex::search::{search_documents, QueryParams};
use docdex::sparse;
use docdex::traits::{Embedder, EmbeddingTask, FileStore, TextExtractor, VectorStore};

const DIMS: usize = 8;

// ============ Mock collaborators ============

#[derive(Default)]
struct MockFileStore {
    files: Mutex<BTreeMap<String, (Vec<u8>, i64)>>,
}

impl MockFileStore {
    fn put(&self, path: &str, content: &str, last_modified: i64) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (content.as_bytes().to_vec(), last_modified));
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, (bytes, last_modified))| RemoteFile {
                path: path.clone(),
                content_hash: hex::encode(Sha256::digest(bytes)),
                last_modified: *last_modified,
            })
            .collect())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        match self.files.lock().unwrap().get(path) {
            Some((bytes, _)) => Ok(bytes.clone()),
            None => bail!("no such file: {}", path),
        }
    }
}

/// Treats the file bytes as the document text, one page. Bytes containing
/// the marker `OCRFAIL` simulate an extraction failure.
struct MockExtractor;

#[async_trait]
impl TextExtractor for MockExtractor {
    async fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text = String::from_utf8_lossy(bytes).to_string();
        if text.contains("OCRFAIL") {
            bail!("simulated extraction failure");
        }
        Ok(vec![text])
    }
}

/// Sleeps far past any stage timeout used in these tests.
struct SlowExtractor;

#[async_trait]
impl TextExtractor for SlowExtractor {
    async fn extract_text(&self, _bytes: &[u8]) -> Result<Vec<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(vec!["too late".to_string()])
    }
}

/// Deterministic bag-of-words embedder: each token adds weight to one of
/// `DIMS` buckets, then the vector is L2-normalized.
struct MockEmbedder;

fn bucket_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        vector[(digest[0] as usize) % DIMS] += 1.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_dense(&self, texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bucket_vector(t)).collect())
    }

    fn embed_sparse(&self, text: &str) -> SparseVector {
        sparse::encode(text)
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        Ok(format!("summary: {}", text.chars().take(20).collect::<String>()))
    }

    fn dims(&self) -> usize {
        DIMS
    }
}

/// Claims `DIMS`-wide vectors but hands back three-wide ones.
struct WrongWidthEmbedder;

#[async_trait]
impl Embedder for WrongWidthEmbedder {
    async fn embed_dense(&self, texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5, 0.5, 0.5]).collect())
    }

    fn embed_sparse(&self, text: &str) -> SparseVector {
        sparse::encode(text)
    }

    async fn summarize(&self, _text: &str) -> Result<String> {
        Ok("-".to_string())
    }

    fn dims(&self) -> usize {
        DIMS
    }
}

#[derive(Default)]
struct StoredChunk {
    document_id: String,
    sequence_index: usize,
    text: String,
    dense: Vec<f32>,
    sparse: SparseVector,
}

/// In-memory vector store ranking by cosine (dense) and dot product (sparse).
/// `fail_storing` simulates a write crash after the old state is cleared;
/// `fail_query` simulates an outage on the read path.
#[derive(Default)]
struct MockVectorStore {
    documents: Mutex<HashMap<String, (DocumentRecord, Vec<f32>)>>,
    chunks: Mutex<HashMap<String, StoredChunk>>,
    fail_storing: AtomicBool,
    fail_query: AtomicBool,
}

impl MockVectorStore {
    fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    fn chunk_ids_of(&self, document_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.document_id == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn ranked(mut scored: Vec<(f32, ChunkHit)>, limit: usize) -> Vec<ChunkHit> {
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
    });
    scored.into_iter().take(limit).map(|(_, hit)| hit).collect()
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn replace_document(
        &self,
        document: &DocumentRecord,
        document_vector: &[f32],
        _document_sparse: &SparseVector,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        // Old state is cleared before the failure point, mirroring the
        // production write order where the document point goes first.
        self.documents.lock().unwrap().remove(&document.id);
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, c| c.document_id != document.id);

        if self.fail_storing.load(Ordering::SeqCst) {
            bail!("simulated vector store outage");
        }

        let mut stored = self.chunks.lock().unwrap();
        for chunk in chunks {
            stored.insert(
                chunk.id.clone(),
                StoredChunk {
                    document_id: chunk.document_id.clone(),
                    sequence_index: chunk.sequence_index,
                    text: chunk.text.clone(),
                    dense: chunk.dense.clone(),
                    sparse: chunk.sparse.clone(),
                },
            );
        }
        drop(stored);

        self.documents
            .lock()
            .unwrap()
            .insert(document.id.clone(), (document.clone(), document_vector.to_vec()));
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.documents.lock().unwrap().remove(document_id);
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, c| c.document_id != document_id);
        Ok(())
    }

    async fn query_dense(&self, vector: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        if self.fail_query.load(Ordering::SeqCst) {
            bail!("simulated vector store outage");
        }
        let scored = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| {
                (
                    cosine(vector, &c.dense),
                    ChunkHit {
                        chunk_id: id.clone(),
                        document_id: c.document_id.clone(),
                        sequence_index: c.sequence_index,
                        text: c.text.clone(),
                    },
                )
            })
            .collect();
        Ok(ranked(scored, limit))
    }

    async fn query_sparse(&self, vector: &SparseVector, limit: usize) -> Result<Vec<ChunkHit>> {
        let scored = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| {
                (
                    sparse::dot(vector, &c.sparse),
                    ChunkHit {
                        chunk_id: id.clone(),
                        document_id: c.document_id.clone(),
                        sequence_index: c.sequence_index,
                        text: c.text.clone(),
                    },
                )
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        Ok(ranked(scored, limit))
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(document_id)
            .map(|(doc, _)| doc.clone()))
    }
}

// ============ Harness ============

struct Harness {
    _dir: TempDir,
    config: Config,
    pool: sqlx::SqlitePool,
    files: Arc<MockFileStore>,
    vectors: Arc<MockVectorStore>,
    embedder: Arc<dyn Embedder>,
    pipeline: Pipeline,
}

async fn harness() -> Harness {
    harness_with(Arc::new(MockExtractor), Arc::new(MockEmbedder), 120).await
}

async fn harness_with(
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    stage_timeout_secs: u64,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        r#"
        [db]
        path = "{}/docdex.sqlite"
        [filestore]
        root = "{}"
        [chunking]
        chunk_size = 40
        overlap = 10
        [ingest]
        stage_timeout_secs = {}
        [server]
        bind = "127.0.0.1:0"
        "#,
        dir.path().display(),
        dir.path().display(),
        stage_timeout_secs,
    ))
    .unwrap();

    let pool = db::connect(&config.db.path).await.unwrap();
    let files = Arc::new(MockFileStore::default());
    let vectors = Arc::new(MockVectorStore::default());

    let pipeline = Pipeline::new(
        config.clone(),
        pool.clone(),
        files.clone(),
        extractor,
        embedder.clone(),
        vectors.clone(),
    );

    Harness {
        _dir: dir,
        config,
        pool,
        files,
        vectors,
        embedder,
        pipeline,
    }
}

async fn status_of(h: &Harness, path: &str) -> InventoryStatus {
    inventory::load_all(&h.pool).await.unwrap()[path].status
}

// ============ Indexing ============

#[tokio::test]
async fn first_batch_indexes_all_listed_files() {
    let h = harness().await;
    h.files.put("a.pdf", "alpha document about storage engines", 100);
    h.files.put("b.pdf", "beta document about network protocols", 200);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.added, 2);
    assert_eq!(summary.indexed, 2);
    assert!(summary.failures.is_empty());
    assert!(summary.partial_failure().is_none());
    assert_eq!(h.vectors.document_count(), 2);
    assert_eq!(status_of(&h, "a.pdf").await, InventoryStatus::Processed);
}

#[tokio::test]
async fn rerun_without_changes_is_a_noop() {
    let h = harness().await;
    h.files.put("a.pdf", "stable content", 100);

    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();
    let second = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.indexed, 0);
}

#[tokio::test]
async fn updated_content_replaces_the_whole_chunk_set() {
    let h = harness().await;
    let long = "alpha ".repeat(20); // several chunks at chunk_size 40
    h.files.put("a.pdf", &long, 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    let doc_id = models::document_id("a.pdf");
    let before = h.vectors.chunk_ids_of(&doc_id);
    assert!(before.len() > 1);

    h.files.put("a.pdf", "short now", 150);
    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();
    assert_eq!(summary.updated, 1);

    let after = h.vectors.chunk_ids_of(&doc_id);
    assert_eq!(after.len(), 1);
    let doc = h.vectors.get_document(&doc_id).await.unwrap().unwrap();
    assert_eq!(doc.chunk_count, 1);
    assert_eq!(doc.last_modified, 150);
}

#[tokio::test]
async fn deleted_file_is_tombstoned_and_its_vectors_removed() {
    let h = harness().await;
    h.files.put("a.pdf", "goes away", 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    h.files.remove("a.pdf");
    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(h.vectors.document_count(), 0);
    assert!(h
        .vectors
        .chunk_ids_of(&models::document_id("a.pdf"))
        .is_empty());
    assert_eq!(status_of(&h, "a.pdf").await, InventoryStatus::Deleted);
}

#[tokio::test]
async fn one_failing_file_does_not_stop_the_others() {
    let h = harness().await;
    h.files.put("good.pdf", "healthy content", 100);
    h.files.put("bad.pdf", "OCRFAIL broken scan", 100);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.indexed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].path, "bad.pdf");
    assert_eq!(summary.failures[0].stage, Stage::Extracting);
    assert!(matches!(
        summary.partial_failure(),
        Some(docdex::error::Error::PartialBatchFailure { failed: 1, total: 2 })
    ));

    assert_eq!(status_of(&h, "good.pdf").await, InventoryStatus::Processed);
    assert_eq!(status_of(&h, "bad.pdf").await, InventoryStatus::Failed);
    let records = inventory::load_all(&h.pool).await.unwrap();
    assert_eq!(records["bad.pdf"].failed_stage.as_deref(), Some("extracting"));
}

#[tokio::test]
async fn failed_file_is_retried_on_the_next_pass() {
    let h = harness().await;
    h.files.put("flaky.pdf", "OCRFAIL first attempt", 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();
    assert_eq!(status_of(&h, "flaky.pdf").await, InventoryStatus::Failed);

    h.files.put("flaky.pdf", "second attempt reads fine", 150);
    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.indexed, 1);
    assert_eq!(status_of(&h, "flaky.pdf").await, InventoryStatus::Processed);
}

#[tokio::test]
async fn empty_document_fails_at_extraction() {
    let h = harness().await;
    h.files.put("empty.pdf", "   ", 100);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Extracting);
    assert_eq!(h.vectors.document_count(), 0);
}

#[tokio::test]
async fn storing_failure_leaves_no_partial_document() {
    let h = harness().await;
    h.files.put("a.pdf", "will not make it", 100);
    h.vectors.fail_storing.store(true, Ordering::SeqCst);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Storing);
    assert_eq!(status_of(&h, "a.pdf").await, InventoryStatus::Failed);

    // Nothing half-written: no document, no chunks.
    assert_eq!(h.vectors.document_count(), 0);
    assert!(h
        .vectors
        .chunk_ids_of(&models::document_id("a.pdf"))
        .is_empty());

    // Recovery on the next pass once the store is back.
    h.vectors.fail_storing.store(false, Ordering::SeqCst);
    let retry = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();
    assert_eq!(retry.indexed, 1);
    assert_eq!(h.vectors.document_count(), 1);
}

#[tokio::test]
async fn wrong_width_vectors_fail_at_embedding() {
    let h = harness_with(Arc::new(MockExtractor), Arc::new(WrongWidthEmbedder), 120).await;
    h.files.put("a.pdf", "content the provider mangles", 100);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.indexed, 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Embedding);
    assert!(summary.failures[0].error.contains("expected 8"));
    assert_eq!(h.vectors.document_count(), 0);
    assert_eq!(status_of(&h, "a.pdf").await, InventoryStatus::Failed);
}

#[tokio::test]
async fn stage_timeout_marks_the_file_failed() {
    let h = harness_with(Arc::new(SlowExtractor), Arc::new(MockEmbedder), 1).await;
    h.files.put("slow.pdf", "never extracted", 100);

    let summary = h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    assert_eq!(summary.indexed, 0);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Stage::Extracting);
    assert!(summary.failures[0].error.contains("timed out"));
    assert_eq!(h.vectors.document_count(), 0);

    let records = inventory::load_all(&h.pool).await.unwrap();
    assert_eq!(records["slow.pdf"].status, InventoryStatus::Failed);
    assert_eq!(records["slow.pdf"].failed_stage.as_deref(), Some("extracting"));
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let h = harness().await;
    h.files.put("a.pdf", "never touched", 100);

    let options = BatchOptions {
        dry_run: true,
        ..BatchOptions::default()
    };
    let summary = h.pipeline.run_batch(&options).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.added, 1);
    assert_eq!(summary.indexed, 0);
    assert_eq!(h.vectors.document_count(), 0);
    assert!(inventory::load_all(&h.pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn full_reindex_reprocesses_unchanged_files() {
    let h = harness().await;
    h.files.put("a.pdf", "same bytes as before", 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    let options = BatchOptions {
        full: true,
        ..BatchOptions::default()
    };
    let summary = h.pipeline.run_batch(&options).await.unwrap();
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.indexed, 1);
}

// ============ Search ============

#[tokio::test]
async fn search_returns_one_result_per_document() {
    let h = harness().await;
    // d1 mentions "turbine" in every chunk; d2 once among other topics.
    h.files.put(
        "d1.pdf",
        "turbine blade wear, turbine inlet temps, turbine shaft balance, turbine housing",
        100,
    );
    h.files.put(
        "d2.pdf",
        "pump maintenance schedule and one turbine reference among pipes",
        200,
    );
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "turbine", None, None).unwrap();
    let results = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
    assert!(ids.contains(&models::document_id("d1.pdf").as_str()));
    assert!(ids.contains(&models::document_id("d2.pdf").as_str()));
    // Scores are descending and every result carries its best chunk.
    assert!(results[0].score >= results[1].score);
    for r in &results {
        assert!(!r.best_chunk_id.is_empty());
        assert!(!r.snippet.is_empty());
    }
}

#[tokio::test]
async fn multi_chunk_document_appears_once_with_its_best_chunk() {
    let h = harness().await;
    let text = "engine overhaul ".repeat(15); // multiple chunks, all matching
    h.files.put("d1.pdf", &text, 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();
    assert!(h.vectors.chunk_ids_of(&models::document_id("d1.pdf")).len() > 1);

    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "engine overhaul", None, None).unwrap();
    let results = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, models::document_id("d1.pdf"));
}

#[tokio::test]
async fn top_k_truncates_the_result_list() {
    let h = harness().await;
    for i in 0..4i64 {
        h.files
            .put(&format!("doc{}.pdf", i), &format!("compressor report {}", i), 100 + i);
    }
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "compressor report", Some(2), None).unwrap();
    let results = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn vector_store_outage_fails_the_query() {
    let h = harness().await;
    h.files.put("a.pdf", "indexed fine", 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    h.vectors.fail_query.store(true, Ordering::SeqCst);
    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "indexed", None, None).unwrap();
    let err = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<docdex::error::Error>(),
        Some(docdex::error::Error::QueryCollaborator(_))
    ));
}

#[tokio::test]
async fn query_embedding_failure_fails_the_query() {
    let h = harness_with(
        Arc::new(MockExtractor),
        Arc::new(docdex::embedding::DisabledEmbedder),
        120,
    )
    .await;

    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "anything", None, None).unwrap();
    let err = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<docdex::error::Error>(),
        Some(docdex::error::Error::QueryCollaborator(_))
    ));
}

#[tokio::test]
async fn deleted_document_stops_appearing_in_search() {
    let h = harness().await;
    h.files.put("gone.pdf", "transient knowledge", 100);
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    h.files.remove("gone.pdf");
    h.pipeline.run_batch(&BatchOptions::default()).await.unwrap();

    let vectors: Arc<dyn VectorStore> = h.vectors.clone();
    let params = QueryParams::new(&h.config.retrieval, "transient knowledge", None, None).unwrap();
    let results = search_documents(&h.config.retrieval, &h.embedder, &vectors, &params)
        .await
        .unwrap();
    assert!(results.is_empty());
}
