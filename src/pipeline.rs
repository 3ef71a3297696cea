//! Indexing pipeline: one batch turns a fresh file-store listing into an
//! up-to-date vector index.
//!
//! A batch is: purge stale tombstones, list and validate the store, diff
//! against the inventory, apply deletions, then run the per-file stage chain
//! (download, extract, summarize, chunk, embed, store) over the added and
//! updated files with bounded concurrency. Failures are isolated per file;
//! only a malformed listing aborts the whole batch.
//!
//! A failed file keeps no partial progress. The retry on the next pass starts
//! from download, and whatever version of the document was indexed before
//! stays searchable until the new version lands in one replace.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::diff::{detect_changes, validate_listing};
use crate::error::Error;
use crate::inventory;
use crate::migrate;
use crate::models::{self, ChunkRecord, DocumentRecord, RemoteFile};
use crate::traits::{Embedder, EmbeddingTask, FileStore, TextExtractor, VectorStore};

/// Characters of document text embedded as the whole-document vector.
const DOC_EMBED_MAX_CHARS: usize = 30_000;

/// Per-file pipeline stages, in execution order. The stage name is recorded
/// in the inventory when a file fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Downloading,
    Extracting,
    Summarizing,
    Chunking,
    Embedding,
    Storing,
    Deleting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Summarizing => "summarizing",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Storing => "storing",
            Stage::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Reprocess every listed file regardless of content hash.
    pub full: bool,
    /// Diff and report only; no downloads, no writes.
    pub dry_run: bool,
    /// Process at most this many files this pass.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: String,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub indexed: usize,
    pub chunks_written: usize,
    pub failures: Vec<FileFailure>,
    pub dry_run: bool,
}

impl BatchSummary {
    /// The batch-level error to report when some files failed.
    pub fn partial_failure(&self) -> Option<Error> {
        if self.failures.is_empty() {
            None
        } else {
            Some(Error::PartialBatchFailure {
                failed: self.failures.len(),
                total: self.indexed + self.failures.len(),
            })
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    files: Arc<dyn FileStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        files: Arc<dyn FileStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            config,
            pool,
            files,
            extractor,
            embedder,
            vectors,
        }
    }

    pub async fn run_batch(&self, options: &BatchOptions) -> Result<BatchSummary> {
        migrate::run_migrations(&self.pool).await?;
        let purged =
            inventory::purge_stale(&self.pool, self.config.ingest.tombstone_retention_secs)
                .await?;
        if purged > 0 {
            tracing::debug!(purged, "purged stale tombstones");
        }

        let listing = self
            .files
            .list_files()
            .await
            .map_err(|e| Error::TransientIo(format!("file store listing failed: {:#}", e)))?;
        validate_listing(&listing)?;

        let known = inventory::load_all(&self.pool).await?;
        let changes = detect_changes(&known, &listing);

        let mut summary = BatchSummary {
            added: changes.added.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged.len(),
            dry_run: options.dry_run,
            ..BatchSummary::default()
        };

        let mut to_process: Vec<RemoteFile> = if options.full {
            listing.clone()
        } else {
            changes
                .added
                .iter()
                .chain(changes.updated.iter())
                .cloned()
                .collect()
        };
        if let Some(limit) = options.limit {
            to_process.truncate(limit);
        }

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            processing = to_process.len(),
            dry_run = options.dry_run,
            "change detection complete"
        );

        if options.dry_run {
            return Ok(summary);
        }

        self.vectors.ensure_ready().await?;

        for path in &changes.deleted {
            match self.vectors.delete_document(&models::document_id(path)).await {
                Ok(()) => inventory::mark_deleted(&self.pool, path).await?,
                Err(e) => {
                    tracing::warn!(path = %path, error = %format!("{:#}", e), "deletion failed");
                    summary.failures.push(FileFailure {
                        path: path.clone(),
                        stage: Stage::Deleting,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.ingest.concurrency));
        let mut tasks: JoinSet<(RemoteFile, std::result::Result<usize, (Stage, String)>)> =
            JoinSet::new();

        for file in to_process {
            inventory::mark_pending(&self.pool, &file).await?;

            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // Closing the semaphore is not part of this design, so
                // acquisition only fails if the runtime is shutting down.
                let _permit = semaphore.acquire().await;
                let outcome = this.process_file(&file).await;
                (file, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (file, outcome) = joined?;
            match outcome {
                Ok(chunk_count) => {
                    inventory::mark_processed(&self.pool, &file).await?;
                    summary.indexed += 1;
                    summary.chunks_written += chunk_count;
                    tracing::info!(path = %file.path, chunks = chunk_count, "indexed");
                }
                Err((stage, error)) => {
                    inventory::mark_failed(&self.pool, &file, stage.as_str()).await?;
                    tracing::warn!(path = %file.path, stage = %stage, error = %error, "file failed");
                    summary.failures.push(FileFailure {
                        path: file.path,
                        stage,
                        error,
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Run the full stage chain for one file. Returns the number of chunks
    /// written on success, or the failing stage and its error.
    async fn process_file(
        &self,
        file: &RemoteFile,
    ) -> std::result::Result<usize, (Stage, String)> {
        let bytes = self
            .stage(Stage::Downloading, self.files.download(&file.path))
            .await?;

        let pages = self
            .stage(Stage::Extracting, self.extractor.extract_text(&bytes))
            .await?;
        let text = pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return Err((
                Stage::Extracting,
                "document contains no extractable text".to_string(),
            ));
        }

        let summary = self
            .stage(Stage::Summarizing, self.embedder.summarize(&text))
            .await?;

        let chunks = chunk_text(
            &text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        )
        .map_err(|e| (Stage::Chunking, format!("{:#}", e)))?;

        let doc_excerpt: String = text.chars().take(DOC_EMBED_MAX_CHARS).collect();
        let doc_vector = self
            .stage(
                Stage::Embedding,
                self.embedder
                    .embed_dense(std::slice::from_ref(&doc_excerpt), EmbeddingTask::Document),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                (
                    Stage::Embedding,
                    "provider returned no document vector".to_string(),
                )
            })?;

        // Width is validated here, not just in the provider, so no Embedder
        // implementation can push wrong-dimension vectors into the store.
        let dims = self.embedder.dims();
        if doc_vector.len() != dims {
            return Err((
                Stage::Embedding,
                format!(
                    "provider returned a {}-dim document vector, expected {}",
                    doc_vector.len(),
                    dims
                ),
            ));
        }

        let chunk_vectors = self
            .stage(
                Stage::Embedding,
                self.embedder.embed_dense(&chunks, EmbeddingTask::Document),
            )
            .await?;
        if chunk_vectors.len() != chunks.len() {
            return Err((
                Stage::Embedding,
                format!(
                    "provider returned {} vectors for {} chunks",
                    chunk_vectors.len(),
                    chunks.len()
                ),
            ));
        }
        if let Some(bad) = chunk_vectors.iter().find(|v| v.len() != dims) {
            return Err((
                Stage::Embedding,
                format!(
                    "provider returned a {}-dim chunk vector, expected {}",
                    bad.len(),
                    dims
                ),
            ));
        }

        let doc_id = models::document_id(&file.path);
        let chunk_records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(chunk_vectors)
            .enumerate()
            .map(|(index, (text, dense))| ChunkRecord {
                id: models::chunk_id(&doc_id, index),
                document_id: doc_id.clone(),
                sequence_index: index,
                text: text.clone(),
                dense,
                sparse: self.embedder.embed_sparse(text),
            })
            .collect();

        let document = DocumentRecord {
            id: doc_id,
            path: file.path.clone(),
            file_name: file
                .path
                .rsplit('/')
                .next()
                .unwrap_or(&file.path)
                .to_string(),
            summary,
            content_hash: file.content_hash.clone(),
            last_modified: file.last_modified,
            chunk_count: chunk_records.len(),
        };

        let doc_sparse = self.embedder.embed_sparse(&doc_excerpt);
        self.stage(
            Stage::Storing,
            self.vectors
                .replace_document(&document, &doc_vector, &doc_sparse, &chunk_records),
        )
        .await?;

        Ok(document.chunk_count)
    }

    async fn stage<T>(
        &self,
        stage: Stage,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> std::result::Result<T, (Stage, String)> {
        let timeout = Duration::from_secs(self.config.ingest.stage_timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err((stage, format!("{:#}", e))),
            Err(_) => Err((stage, format!("timed out after {}s", timeout.as_secs()))),
        }
    }
}
