//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/documents/search` | Answer a question from the index |
//! | `POST` | `/api/documents/index/{*path}` | (Re)index one synced document |
//! | `GET`  | `/api/documents/check-indexes` | Paths that currently have chunks |
//! | `GET`  | `/health` | Health check (no authentication) |
//!
//! Every `/api` route requires `Authorization: Bearer <token>`. Errors are
//! returned as `{"detail": "...", "code": "..."}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use deedbox_core::models::SearchResponse;
use deedbox_core::Error;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;

/// Caller identity established by an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

/// Verifies bearer tokens.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Principal>;
}

/// Fixed set of accepted tokens, typically read from the environment.
///
/// Each token maps to a `client-<n>` identity in the order given.
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map: HashMap<String, String> = HashMap::new();
        for token in tokens {
            let token: String = token.into();
            if token.is_empty() || map.contains_key(&token) {
                continue;
            }
            let id = format!("client-{}", map.len() + 1);
            map.insert(token, id);
        }
        Self { tokens: map }
    }

    /// Comma-separated tokens from the variable `name`; empty if unset.
    pub fn from_env(name: &str) -> Self {
        let raw = std::env::var(name).unwrap_or_default();
        Self::new(raw.split(',').map(str::trim))
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<Principal> {
        self.tokens.get(token).map(|id| Principal { id: id.clone() })
    }
}

#[derive(Clone)]
struct AppState {
    app: Arc<App>,
    auth: Arc<dyn Authenticator>,
}

/// Build the router.
pub fn router(app: Arc<App>, auth: Arc<dyn Authenticator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/documents/search", post(handle_search))
        .route("/api/documents/index/{*path}", post(handle_index))
        .route("/api/documents/check-indexes", get(handle_check_indexes))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { app, auth })
}

/// Serve on an already bound listener until the process ends.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Arc<App>,
    auth: Arc<dyn Authenticator>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(app, auth)).await?;
    Ok(())
}

/// Bind to `[server].bind`, start the periodic sync task if configured, and
/// serve.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let tokens = StaticTokens::from_env(&app.config.server.tokens_env);
    if tokens.is_empty() {
        tracing::warn!(
            env = %app.config.server.tokens_env,
            "no API tokens configured; every /api request will be rejected"
        );
    }

    if let (Some(secs), Ok(_)) = (app.config.sync.interval_secs, app.reconciler()) {
        spawn_periodic_sync(Arc::clone(&app), Duration::from_secs(secs));
    }

    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    serve(listener, app, Arc::new(tokens)).await
}

fn spawn_periodic_sync(app: Arc<App>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match app.sync().await {
                Ok(report) => tracing::info!(
                    status = ?report.status.overall_status,
                    indexed = report.indexed,
                    "periodic sync finished"
                ),
                Err(Error::AlreadyRunning(_)) => {
                    tracing::info!("sync already running; skipping this tick")
                }
                Err(e) => tracing::error!(error = %e, "periodic sync failed"),
            }
        }
    });
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    code: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyRunning(_) => StatusCode::CONFLICT,
            Error::Extract { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Error::Transfer { .. } | Error::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            detail: err.to_string(),
        }
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        detail: "missing or invalid bearer token".to_string(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Principal, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(unauthorized)?;
    state.auth.authenticate(token).ok_or_else(unauthorized)
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

// ============ POST /api/documents/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let principal = authorize(&state, &headers)?;
    let Json(req) = payload.map_err(|e| {
        AppError::from(Error::Config(format!("invalid request body: {}", e.body_text())))
    })?;
    tracing::debug!(caller = %principal.id, top_k = ?req.top_k, "search");
    let response = state.app.retrieval.search(&req.query, req.top_k).await?;
    Ok(Json(response))
}

// ============ POST /api/documents/index/{*path} ============

#[derive(Serialize)]
struct IndexResponse {
    message: String,
    document_id: String,
    chunks: usize,
}

async fn handle_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<IndexResponse>, AppError> {
    let principal = authorize(&state, &headers)?;
    tracing::debug!(caller = %principal.id, path = %path, "index");
    let report = state.app.retrieval.index_document(&path).await?;
    Ok(Json(IndexResponse {
        message: "Document indexed successfully".to_string(),
        document_id: report.path,
        chunks: report.chunks,
    }))
}

// ============ GET /api/documents/check-indexes ============

#[derive(Serialize)]
struct IndexesResponse {
    indexes: Vec<String>,
}

async fn handle_check_indexes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<IndexesResponse>, AppError> {
    authorize(&state, &headers)?;
    let indexes = state.app.retrieval.indexed_documents().await?;
    Ok(Json(IndexesResponse { indexes }))
}
