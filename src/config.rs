use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Hard bounds on per-request query parameters. Configured maxima may narrow
/// these but never widen them.
pub const TOP_K_BOUND: usize = 50;
pub const CHUNK_CANDIDATES_BOUND: usize = 200;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub filestore: FileStoreConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows. Must be < chunk_size.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    1200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_chunk_candidates")]
    pub default_chunk_candidates: usize,
    /// Upper bound accepted for per-request `top_k` (capped at 50).
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    /// Upper bound accepted for per-request `chunk_candidates` (capped at 200).
    #[serde(default = "default_chunk_candidates_max")]
    pub chunk_candidates_max: usize,
    /// Snippet length cap in characters.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            default_top_k: default_top_k(),
            default_chunk_candidates: default_chunk_candidates(),
            top_k_max: default_top_k_max(),
            chunk_candidates_max: default_chunk_candidates_max(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_rrf_k() -> usize {
    60
}
fn default_top_k() -> usize {
    5
}
fn default_chunk_candidates() -> usize {
    50
}
fn default_top_k_max() -> usize {
    TOP_K_BOUND
}
fn default_chunk_candidates_max() -> usize {
    CHUNK_CANDIDATES_BOUND
}
fn default_snippet_chars() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` (OpenAI-compatible REST endpoint) or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Dense vector dimensionality D.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    /// Skip the summarization stage entirely; documents store `"-"`.
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Characters of document text offered to the summarizer.
    #[serde(default = "default_summary_input_chars")]
    pub max_input_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            skip: false,
            url: None,
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_summary_input_chars(),
        }
    }
}

fn default_summary_input_chars() -> usize {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `"local"` (pdf text layer) or `"remote"` (OCR HTTP service).
    #[serde(default = "default_ocr_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_ocr_provider(),
            url: None,
            timeout_secs: default_ocr_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_ocr_provider() -> String {
    "local".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_document_collection")]
    pub document_collection: String,
    #[serde(default = "default_chunk_collection")]
    pub chunk_collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            document_collection: default_document_collection(),
            chunk_collection: default_chunk_collection(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_document_collection() -> String {
    "documents".to_string()
}
fn default_chunk_collection() -> String {
    "chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files processed concurrently within one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-stage timeout; an expired stage marks the file `Failed`.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Scheduled batch interval for `serve` mode. Absent = on demand only.
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Tombstoned inventory entries older than this are purged at batch
    /// start. Failed entries are kept; they drive retries.
    #[serde(default = "default_retention_secs")]
    pub tombstone_retention_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            stage_timeout_secs: default_stage_timeout_secs(),
            interval_secs: None,
            tombstone_retention_secs: default_retention_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_retention_secs() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Startup validation. Violations are fatal and never retried.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(invalid("chunking.chunk_size must be > 0"));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(invalid(format!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap, config.chunking.chunk_size
        )));
    }

    if config.retrieval.rrf_k == 0 {
        return Err(invalid("retrieval.rrf_k must be >= 1"));
    }
    if config.retrieval.top_k_max < 1 || config.retrieval.top_k_max > TOP_K_BOUND {
        return Err(invalid(format!(
            "retrieval.top_k_max must be in 1..={}",
            TOP_K_BOUND
        )));
    }
    if config.retrieval.chunk_candidates_max < 1
        || config.retrieval.chunk_candidates_max > CHUNK_CANDIDATES_BOUND
    {
        return Err(invalid(format!(
            "retrieval.chunk_candidates_max must be in 1..={}",
            CHUNK_CANDIDATES_BOUND
        )));
    }
    if config.retrieval.default_top_k < 1
        || config.retrieval.default_top_k > config.retrieval.top_k_max
    {
        return Err(invalid("retrieval.default_top_k out of bounds"));
    }
    if config.retrieval.default_chunk_candidates < 1
        || config.retrieval.default_chunk_candidates > config.retrieval.chunk_candidates_max
    {
        return Err(invalid("retrieval.default_chunk_candidates out of bounds"));
    }

    if config.ingest.concurrency == 0 {
        return Err(invalid("ingest.concurrency must be >= 1"));
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                return Err(invalid("embedding.model required when provider is 'openai'"));
            }
            match config.embedding.dims {
                Some(d) if d > 0 => {}
                _ => return Err(invalid("embedding.dims must be > 0 when provider is 'openai'")),
            }
        }
        other => {
            return Err(invalid(format!(
                "unknown embedding provider: '{}'. Must be openai or disabled",
                other
            )));
        }
    }

    match config.ocr.provider.as_str() {
        "local" => {}
        "remote" => {
            if config.ocr.url.is_none() {
                return Err(invalid("ocr.url required when provider is 'remote'"));
            }
        }
        other => {
            return Err(invalid(format!(
                "unknown ocr provider: '{}'. Must be local or remote",
                other
            )));
        }
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    Error::invalid_config(msg).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            [db]
            path = "/tmp/docdex.sqlite"
            [filestore]
            root = "/tmp/files"
            [chunking]
            chunk_size = 1000
            overlap = 100
            [server]
            bind = "127.0.0.1:7700"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn overlap_not_below_chunk_size_is_rejected() {
        let mut cfg = base_config();
        cfg.chunking.overlap = cfg.chunking.chunk_size;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn top_k_max_cannot_exceed_hard_bound() {
        let mut cfg = base_config();
        cfg.retrieval.top_k_max = 51;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn chunk_candidates_max_cannot_exceed_hard_bound() {
        let mut cfg = base_config();
        cfg.retrieval.chunk_candidates_max = 500;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let mut cfg = base_config();
        cfg.embedding.provider = "openai".to_string();
        assert!(validate(&cfg).is_err());

        cfg.embedding.model = Some("text-embedding-3-small".to_string());
        cfg.embedding.dims = Some(1536);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = base_config();
        cfg.ingest.concurrency = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn defaults_cover_retrieval_section() {
        let cfg = base_config();
        assert_eq!(cfg.retrieval.rrf_k, 60);
        assert_eq!(cfg.retrieval.top_k_max, 50);
        assert_eq!(cfg.retrieval.chunk_candidates_max, 200);
    }
}
