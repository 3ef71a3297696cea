//! # docdex CLI
//!
//! The `docdex` binary drives the document index. It provides commands for
//! database initialization, running indexing batches, searching, inspecting
//! the inventory, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docdex --config ./config/docdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docdex init` | Create the SQLite inventory database and run migrations |
//! | `docdex ingest` | Run one indexing batch over the file store |
//! | `docdex search "<query>"` | Hybrid search over indexed documents |
//! | `docdex inventory` | Show per-file processing state |
//! | `docdex serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! docdex init --config ./config/docdex.toml
//!
//! # Preview what a batch would do
//! docdex ingest --dry-run
//!
//! # Reprocess everything regardless of content hashes
//! docdex ingest --full
//!
//! # Search
//! docdex search "quarterly revenue forecast" --top-k 10
//!
//! # Serve the HTTP API (with scheduled batches if [ingest].interval_secs is set)
//! docdex serve
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docdex::config::{self, Config};
use docdex::db;
use docdex::embedding::create_embedder;
use docdex::filestore::FilesystemStore;
use docdex::inventory;
use docdex::migrate;
use docdex::models::InventoryStatus;
use docdex::ocr::create_extractor;
use docdex::pipeline::{BatchOptions, Pipeline};
use docdex::search::{search_documents, QueryParams};
use docdex::server;
use docdex::traits::{Embedder, VectorStore};
use docdex::vector_store::QdrantStore;

/// docdex — document indexing and hybrid retrieval over a PDF file store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docdex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docdex",
    about = "docdex — document indexing and hybrid retrieval over a PDF file store",
    version,
    long_about = "docdex keeps a vector index in sync with a store of PDF files and serves \
    hybrid (dense + lexical) search over them. Indexing batches detect added, updated, and \
    deleted files by content hash and run them through a staged pipeline: download, text \
    extraction, summarization, chunking, embedding, and storage."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the inventory database schema.
    ///
    /// Creates the SQLite database file and the inventory table. Idempotent.
    Init,

    /// Run one indexing batch.
    ///
    /// Lists the file store, diffs it against the inventory, removes deleted
    /// documents, and processes added and updated files through the pipeline.
    /// Exits nonzero when some files failed.
    Ingest {
        /// Reprocess every listed file regardless of content hash.
        #[arg(long)]
        full: bool,

        /// Show change counts without downloading or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of files to process this pass.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed documents.
    ///
    /// Runs a hybrid dense + lexical query and prints ranked document
    /// results with scores and snippets.
    Search {
        /// The search query string.
        query: String,

        /// Number of documents to return (1..=configured maximum).
        #[arg(long)]
        top_k: Option<usize>,

        /// Chunk candidates fetched per retrieval list before fusion.
        #[arg(long)]
        chunk_candidates: Option<usize>,
    },

    /// Show per-file processing state from the inventory.
    Inventory,

    /// Start the HTTP API server.
    ///
    /// Serves `/search`, `/admin/ingest-now`, and `/health`. When
    /// `[ingest].interval_secs` is configured, scheduled batches run
    /// alongside the server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            full,
            dry_run,
            limit,
        } => {
            if !dry_run {
                require_embedding(&cfg)?;
            }
            run_ingest(&cfg, BatchOptions {
                full,
                dry_run,
                limit,
            })
            .await?;
        }
        Commands::Search {
            query,
            top_k,
            chunk_candidates,
        } => {
            require_embedding(&cfg)?;
            run_search(&cfg, &query, top_k, chunk_candidates).await?;
        }
        Commands::Inventory => {
            run_inventory(&cfg).await?;
        }
        Commands::Serve => {
            require_embedding(&cfg)?;
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let (embedder, vectors) = build_retrieval(&cfg)?;
            let pipeline = build_pipeline(&cfg, pool, embedder.clone(), vectors.clone())?;
            server::run_server(&cfg, embedder, vectors, pipeline).await?;
        }
    }

    Ok(())
}

fn require_embedding(cfg: &Config) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("this command needs an embedding provider; set embedding.provider = \"openai\"");
    }
    Ok(())
}

fn build_retrieval(cfg: &Config) -> Result<(Arc<dyn Embedder>, Arc<dyn VectorStore>)> {
    let embedder = create_embedder(&cfg.embedding, &cfg.summary)?;
    let vectors: Arc<dyn VectorStore> =
        Arc::new(QdrantStore::new(&cfg.vector_store, embedder.dims())?);
    Ok((embedder, vectors))
}

fn build_pipeline(
    cfg: &Config,
    pool: sqlx::SqlitePool,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
) -> Result<Pipeline> {
    let files = Arc::new(FilesystemStore::new(&cfg.filestore)?);
    let extractor = create_extractor(&cfg.ocr)?;
    Ok(Pipeline::new(
        cfg.clone(),
        pool,
        files,
        extractor,
        embedder,
        vectors,
    ))
}

async fn run_ingest(cfg: &Config, options: BatchOptions) -> Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    let (embedder, vectors) = build_retrieval(cfg)?;
    let pipeline = build_pipeline(cfg, pool, embedder, vectors)?;

    let summary = pipeline.run_batch(&options).await?;

    if summary.dry_run {
        println!(
            "Dry run: {} added, {} updated, {} deleted, {} unchanged.",
            summary.added, summary.updated, summary.deleted, summary.unchanged
        );
        return Ok(());
    }

    println!(
        "Batch complete: {} indexed ({} chunks), {} deleted, {} unchanged.",
        summary.indexed, summary.chunks_written, summary.deleted, summary.unchanged
    );
    for failure in &summary.failures {
        println!(
            "  FAILED {} at {}: {}",
            failure.path, failure.stage, failure.error
        );
    }

    if let Some(err) = summary.partial_failure() {
        return Err(err.into());
    }
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    top_k: Option<usize>,
    chunk_candidates: Option<usize>,
) -> Result<()> {
    let (embedder, vectors) = build_retrieval(cfg)?;
    let params = QueryParams::new(&cfg.retrieval, query, top_k, chunk_candidates)?;
    let results = search_documents(&cfg.retrieval, &embedder, &vectors, &params).await?;

    if results.is_empty() {
        println!("No results for '{}'.", params.query);
        return Ok(());
    }

    println!("{} result(s) for '{}':\n", results.len(), params.query);
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} (score {:.4})",
            rank + 1,
            result.path,
            result.score
        );
        if result.summary != "-" && !result.summary.is_empty() {
            println!("   {}", result.summary);
        }
        println!("   {}\n", result.snippet.replace('\n', " "));
    }
    Ok(())
}

async fn run_inventory(cfg: &Config) -> Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let records = inventory::load_all(&pool).await?;

    let count_of = |status: InventoryStatus| {
        records.values().filter(|r| r.status == status).count()
    };
    println!(
        "{} file(s): {} processed, {} pending, {} failed, {} deleted.",
        records.len(),
        count_of(InventoryStatus::Processed),
        count_of(InventoryStatus::Pending),
        count_of(InventoryStatus::Failed),
        count_of(InventoryStatus::Deleted),
    );

    let mut failed: Vec<_> = records
        .values()
        .filter(|r| r.status == InventoryStatus::Failed)
        .collect();
    failed.sort_by(|a, b| a.path.cmp(&b.path));
    for record in failed {
        println!(
            "  FAILED {} at {}",
            record.path,
            record.failed_stage.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}
