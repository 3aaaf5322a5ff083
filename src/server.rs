//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question against the indexed corpus |
//! | `POST` | `/ingest` | Enqueue a document for (re)ingestion |
//! | `GET`  | `/documents` | List registered documents and their status |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one JSON shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `busy` (409),
//! `queue_full` (429), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::{NoContextPolicy, QueryOrchestrator};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::InvalidRequest;
use crate::extract::ExtractorRegistry;
use crate::generate::{create_generator, GenerateOptions};
use crate::ingest::{list_documents, spawn_workers, IngestPipeline, IngestQueue, SubmitResult};
use crate::migrate::run_migrations;
use crate::models::QueryResponse;
use crate::retrieve::Retriever;
use crate::source::create_source;
use crate::store::{collection_schema, create_store, SearchFilter, VectorStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<QueryOrchestrator>,
    pipeline: Arc<IngestPipeline>,
    queue: IngestQueue,
    pool: sqlx::SqlitePool,
}

/// Wires the full application and returns its router.
///
/// Opens the registry, validates the vector collection against the embedding
/// configuration (a mismatch fails here, before any request is served), and
/// spawns the ingestion workers. Tests serve the returned router on an
/// ephemeral port; [`run_server`] binds it to the configured address.
pub async fn build_app(config: &Config) -> anyhow::Result<Router> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;

    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let store = create_store(config, &pool)?;
    let source = create_source(&config.source)?;

    let schema = collection_schema(config)?;
    store.ensure_collection(&schema).await?;

    let pipeline = Arc::new(IngestPipeline::new(
        pool.clone(),
        source,
        Arc::new(ExtractorRegistry::with_defaults()),
        embedder.clone(),
        store.clone(),
        config.store.collection.clone(),
        config.chunking.clone(),
        config.embedding.batch_size,
    ));
    let queue = spawn_workers(
        pipeline.clone(),
        config.ingest.workers,
        config.ingest.queue_depth,
    );

    let retriever = Retriever::new(
        embedder,
        store,
        config.store.collection.clone(),
        config.retrieval.min_score,
    );
    let policy = NoContextPolicy::parse(&config.prompt.no_context_policy)
        .ok_or_else(|| anyhow::anyhow!("Unknown no_context_policy"))?;
    let orchestrator = Arc::new(QueryOrchestrator::new(
        retriever,
        generator,
        policy,
        config.prompt.context_budget_chars,
        GenerateOptions::from_config(&config.generation),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator,
        pipeline,
        queue,
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/query", post(handle_query))
        .route("/ingest", post(handle_ingest))
        .route("/documents", get(handle_documents))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state))
}

/// Starts the HTTP server and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = build_app(config).await?;
    let bind_addr = config.server.bind.clone();

    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"timeout"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

fn busy(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "busy".to_string(),
        message: message.into(),
    }
}

fn queue_full(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "queue_full".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps orchestration failures to HTTP statuses: caller mistakes carry a
/// typed [`InvalidRequest`] in the chain and become 400, everything else
/// stays 500.
fn classify_query_error(err: anyhow::Error) -> AppError {
    if let Some(invalid) = err.downcast_ref::<InvalidRequest>() {
        bad_request(invalid.to_string())
    } else {
        internal_error(format!("{err:#}"))
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    filter: Option<FilterBody>,
}

#[derive(Deserialize, Default)]
struct FilterBody {
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    source_key: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let top_k = request.top_k.unwrap_or(state.config.retrieval.top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be a positive integer"));
    }

    let body_filter = request.filter.unwrap_or_default();
    let filter = SearchFilter {
        document_id: body_filter.document_id,
        source_key: body_filter.source_key,
    };

    // The timeout covers the whole retrieve → generate sequence.
    let deadline = Duration::from_secs(state.config.server.request_timeout_secs);
    let result = tokio::time::timeout(
        deadline,
        state.orchestrator.answer(&request.query, top_k, &filter),
    )
    .await;

    match result {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(err)) => Err(classify_query_error(err)),
        Err(_) => Err(timeout_error(format!(
            "query timed out after {}s",
            state.config.server.request_timeout_secs
        ))),
    }
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    source_key: String,
}

#[derive(Serialize)]
struct IngestAccepted {
    source_key: String,
    accepted: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    if request.source_key.trim().is_empty() {
        return Err(bad_request("source_key must not be empty"));
    }
    if state.pipeline.is_ingesting(&request.source_key) {
        return Err(busy(format!(
            "ingestion of {} is already running",
            request.source_key
        )));
    }

    match state.queue.submit(&request.source_key) {
        SubmitResult::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(IngestAccepted {
                source_key: request.source_key,
                accepted: true,
            }),
        )),
        SubmitResult::QueueFull => Err(queue_full("ingestion queue is full, retry later")),
    }
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentSummary {
    id: String,
    source_key: String,
    status: String,
    chunk_count: i64,
    failed_step: Option<String>,
    error: Option<String>,
    updated_at: i64,
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    let documents = list_documents(&state.pool)
        .await
        .map_err(|e| internal_error(format!("{e:#}")))?;

    Ok(Json(
        documents
            .into_iter()
            .map(|d| DocumentSummary {
                id: d.id,
                source_key: d.source_key,
                status: d.status.as_str().to_string(),
                chunk_count: d.chunk_count,
                failed_step: d.failed_step,
                error: d.error,
                updated_at: d.updated_at,
            })
            .collect(),
    ))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_maps_to_bad_request() {
        let err = classify_query_error(InvalidRequest::new("query must not be empty").into());
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
        assert_eq!(err.message, "query must not be empty");
    }

    #[test]
    fn test_invalid_request_found_through_context_chain() {
        let err: anyhow::Error = InvalidRequest::new("top_k must be a positive integer").into();
        let err = classify_query_error(err.context("search failed"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn test_other_errors_stay_internal() {
        let err = classify_query_error(anyhow::anyhow!("generation exploded"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
    }
}
