//! JSON HTTP API.
//!
//! Exposes knowledge base management, admission preview, indexing, search
//! and context assembly over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Store statistics |
//! | `GET`  | `/knowledge-bases` | List knowledge bases with counts |
//! | `POST` | `/knowledge-bases` | Create a knowledge base |
//! | `DELETE` | `/knowledge-bases/{name}` | Delete a knowledge base and its content |
//! | `POST` | `/index/preview` | Dry-run admission report for a root |
//! | `POST` | `/index` | Index a root into a knowledge base |
//! | `POST` | `/search` | Similarity search |
//! | `POST` | `/context` | Search and assemble a context string |
//! | `POST` | `/knowledge-bases/{name}/index` | Index into the named knowledge base |
//! | `POST` | `/knowledge-bases/{name}/search` | Search only the named knowledge base |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "dimension_mismatch", "message": "..." } }
//! ```
//!
//! Status codes: `400` bad input, `404` unknown knowledge base, `409`
//! dimension mismatch or duplicate name, `502` embedding backend failure,
//! `503` store unavailable, `500` anything else.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use knowledge_harness_core::context::ContextOptions;
use knowledge_harness_core::error::KbError;
use knowledge_harness_core::filter::Preset;
use knowledge_harness_core::models::KnowledgeBase;
use knowledge_harness_core::store::KnowledgeBaseInfo;

use crate::config::Config;
use crate::ingest::{CancelFlag, IndexOptions, IndexSummary, Indexer};
use crate::preview::{self, Preview};
use crate::search::{self, SearchHit, SearchRequest};
use crate::stats::{self, StatsReport};

pub const DEFAULT_KNOWLEDGE_BASE: &str = "default";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub indexer: Indexer,
    pub context: ContextOptions,
}

impl AppState {
    pub fn from_config(config: &Config, indexer: Indexer) -> Self {
        Self {
            indexer,
            context: config.retrieval.context_options(),
        }
    }
}

/// Build the router with every route and permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route(
            "/knowledge-bases",
            get(handle_list_knowledge_bases).post(handle_create_knowledge_base),
        )
        .route(
            "/knowledge-bases/{name}",
            axum::routing::delete(handle_delete_knowledge_base),
        )
        .route("/knowledge-bases/{name}/index", post(handle_index_named))
        .route("/knowledge-bases/{name}/search", post(handle_search_named))
        .route("/index/preview", post(handle_preview))
        .route("/index", post(handle_index))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config, indexer: Indexer) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::from_config(config, indexer));

    info!(addr = %bind_addr, "HTTP server listening");
    println!("Knowledge server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"dimension_mismatch"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
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

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let status = match &err {
            KbError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            KbError::KnowledgeBaseNotFound(_) => StatusCode::NOT_FOUND,
            KbError::KnowledgeBaseExists(_) | KbError::DimensionMismatch { .. } => {
                StatusCode::CONFLICT
            }
            KbError::ExtractionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            KbError::EmbeddingBackend(_) => StatusCode::BAD_GATEWAY,
            KbError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            KbError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<KbError>() {
            Ok(kb) => kb.into(),
            Err(other) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: format!("{:#}", other),
            },
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ GET /health, GET /stats ============

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

async fn handle_stats(State(state): State<AppState>) -> ApiResult<StatsReport> {
    Ok(Json(stats::collect(state.indexer.engine()).await?))
}

// ============ Knowledge bases ============

#[derive(Serialize)]
struct KnowledgeBaseList {
    knowledge_bases: Vec<KnowledgeBaseInfo>,
}

async fn handle_list_knowledge_bases(State(state): State<AppState>) -> ApiResult<KnowledgeBaseList> {
    let knowledge_bases = state
        .indexer
        .engine()
        .store()
        .list_knowledge_bases()
        .await?;
    Ok(Json(KnowledgeBaseList { knowledge_bases }))
}

#[derive(Deserialize)]
struct CreateKnowledgeBase {
    name: String,
}

async fn handle_create_knowledge_base(
    State(state): State<AppState>,
    Json(body): Json<CreateKnowledgeBase>,
) -> Result<(StatusCode, Json<KnowledgeBase>), AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let kb = state
        .indexer
        .engine()
        .store()
        .create_knowledge_base(name)
        .await?;
    Ok((StatusCode::CREATED, Json(kb)))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
}

async fn handle_delete_knowledge_base(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<DeleteResponse> {
    let deleted = state
        .indexer
        .engine()
        .store()
        .delete_knowledge_base(&name)
        .await?;
    if !deleted {
        return Err(KbError::KnowledgeBaseNotFound(name).into());
    }
    Ok(Json(DeleteResponse { deleted: name }))
}

// ============ Preview and indexing ============

#[derive(Deserialize)]
struct PreviewRequest {
    root: PathBuf,
    #[serde(default)]
    preset: Option<Preset>,
}

async fn handle_preview(
    State(state): State<AppState>,
    Json(body): Json<PreviewRequest>,
) -> ApiResult<Preview> {
    if !body.root.is_dir() {
        return Err(bad_request(format!(
            "root is not a directory: {}",
            body.root.display()
        )));
    }
    let preview = preview::preview(&body.root, state.indexer.filter(), body.preset).await?;
    Ok(Json(preview))
}

#[derive(Deserialize)]
struct IndexRequest {
    root: PathBuf,
    #[serde(default)]
    knowledge_base: Option<String>,
    #[serde(default)]
    full: bool,
    #[serde(default)]
    prune: bool,
    #[serde(default)]
    preset: Option<Preset>,
}

async fn run_index_request(state: &AppState, kb: &str, body: IndexRequest) -> ApiResult<IndexSummary> {
    if !body.root.is_dir() {
        return Err(bad_request(format!(
            "root is not a directory: {}",
            body.root.display()
        )));
    }
    let options = IndexOptions {
        full: body.full,
        prune: body.prune,
        preset: body.preset,
    };
    let summary = state
        .indexer
        .run_index(&body.root, kb, &options, &CancelFlag::new())
        .await?;
    Ok(Json(summary))
}

async fn handle_index(
    State(state): State<AppState>,
    Json(body): Json<IndexRequest>,
) -> ApiResult<IndexSummary> {
    let kb = body
        .knowledge_base
        .clone()
        .unwrap_or_else(|| DEFAULT_KNOWLEDGE_BASE.to_string());
    run_index_request(&state, &kb, body).await
}

async fn handle_index_named(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<IndexRequest>,
) -> ApiResult<IndexSummary> {
    state.indexer.engine().knowledge_base(&name).await?;
    run_index_request(&state, &name, body).await
}

// ============ Search and context ============

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let results = search::search(state.indexer.engine(), &request).await?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_search_named(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    request.knowledge_bases = vec![name];
    handle_search(State(state), Json(request)).await
}

async fn handle_context(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<knowledge_harness_core::context::AssembledContext>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let assembled = search::context(state.indexer.engine(), &request, &state.context).await?;
    Ok(Json(assembled))
}
