//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search` | Hybrid document search (`query`, `top_k`, `chunk_candidates`) |
//! | `POST` | `/admin/ingest-now` | Trigger an indexing batch (202, or 409 if one is running) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses use one schema:
//!
//! ```json
//! { "error": { "code": "invalid_params", "message": "top_k must be in 1..=50" } }
//! ```
//!
//! Error codes: `invalid_params` (400), `conflict` (409),
//! `collaborator_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::models::SearchResult;
use crate::pipeline::{BatchOptions, Pipeline};
use crate::scheduler::{self, BatchGuard};
use crate::search::{search_documents, QueryParams};
use crate::traits::{Embedder, VectorStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    pipeline: Pipeline,
    guard: Arc<BatchGuard>,
}

/// Starts the HTTP server and, when `[ingest].interval_secs` is set, the
/// scheduled ingest loop alongside it. Runs until the process is terminated.
pub async fn run_server(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    pipeline: Pipeline,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let guard = BatchGuard::new();

    if let Some(interval_secs) = config.ingest.interval_secs {
        tokio::spawn(scheduler::run_periodic(
            pipeline.clone(),
            guard.clone(),
            interval_secs,
        ));
        tracing::info!(interval_secs, "scheduled ingest loop started");
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        embedder,
        vectors,
        pipeline,
        guard,
    };

    let app = router(state);

    tracing::info!(addr = %bind_addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/admin/ingest-now", post(handle_ingest_now))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn invalid_params(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_params".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn collaborator_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "collaborator_error".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map domain errors onto HTTP responses by their failure class.
fn classify(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<Error>() {
        Some(Error::InvalidConfig(msg)) => invalid_params(msg.clone()),
        Some(Error::QueryCollaborator(msg)) => collaborator_error(msg.clone()),
        _ => internal(format!("{:#}", err)),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<usize>,
    chunk_candidates: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    request: Result<Query<SearchRequest>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    // Deserialization failures (missing `query`, non-numeric `top_k`) go
    // through the same error schema as every other 4xx.
    let Query(request) = request.map_err(|e| invalid_params(e.body_text()))?;

    let params = QueryParams::new(
        &state.config.retrieval,
        &request.query,
        request.top_k,
        request.chunk_candidates,
    )
    .map_err(classify)?;

    let results = search_documents(
        &state.config.retrieval,
        &state.embedder,
        &state.vectors,
        &params,
    )
    .await
    .map_err(classify)?;

    Ok(Json(SearchResponse {
        query: params.query,
        results,
    }))
}

// ============ POST /admin/ingest-now ============

#[derive(Serialize)]
struct IngestResponse {
    status: String,
}

/// Triggers a batch and returns immediately. The batch runs in the
/// background; its outcome lands in the logs and the inventory.
async fn handle_ingest_now(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let Some(permit) = state.guard.try_begin() else {
        return Err(conflict("an indexing batch is already running"));
    };

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        // Permit moves into the task and is released when the batch ends.
        let _permit = permit;
        match pipeline.run_batch(&BatchOptions::default()).await {
            Ok(summary) => {
                tracing::info!(
                    indexed = summary.indexed,
                    failed = summary.failures.len(),
                    deleted = summary.deleted,
                    "triggered ingest batch finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "triggered ingest batch failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "started".to_string(),
        }),
    ))
}
