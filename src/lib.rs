//! # docdex
//!
//! Local-first document indexing and hybrid retrieval.
//!
//! docdex keeps a vector index in sync with a store of PDF files and serves
//! hybrid (dense + lexical) search over them at document granularity. An
//! indexing batch lists the store, detects added, updated, and deleted files
//! by content hash, and runs changed files through a staged pipeline:
//! download, text extraction, summarization, chunking, embedding, and
//! storage. Queries retrieve chunks by dense and sparse similarity, fuse the
//! two rankings with Reciprocal Rank Fusion, and collapse chunks to their
//! best-scoring document.
//!
//! External systems sit behind the four traits in [`traits`], so the core
//! stays testable and providers stay swappable.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration loading and startup validation |
//! | [`error`] | Domain error taxonomy |
//! | [`models`] | Core data types and stable id derivation |
//! | [`db`] / [`migrate`] | SQLite inventory database |
//! | [`inventory`] | Durable per-file processing state |
//! | [`diff`] | Pure change detection over listings |
//! | [`chunk`] | Overlapping character-window chunker |
//! | [`sparse`] | Local BM25-style sparse encoder |
//! | [`fusion`] | Reciprocal Rank Fusion |
//! | [`traits`] | Collaborator seams |
//! | [`filestore`] | Filesystem file store |
//! | [`ocr`] | Text extraction providers |
//! | [`embedding`] | Embedding and summarization provider |
//! | [`vector_store`] | Qdrant vector store |
//! | [`pipeline`] | Batch orchestration and the per-file stage chain |
//! | [`search`] | Hybrid query engine |
//! | [`scheduler`] | Single-batch guard and scheduled passes |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod db;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod filestore;
pub mod fusion;
pub mod inventory;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod sparse;
pub mod traits;
pub mod vector_store;
