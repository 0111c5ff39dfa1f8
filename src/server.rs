//! HTTP API.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | service info |
//! | `GET /health` | liveness and current run state |
//! | `GET /api/sources[?category=ai]` | list sources |
//! | `POST /api/sources` | register a source |
//! | `PATCH /api/sources/:name` | update a source |
//! | `DELETE /api/sources/:name` | remove a source |
//! | `GET /api/sources/validate` | problems in the catalog |
//! | `POST /api/crawl/run` | start a run in the background |
//! | `GET /api/status` | run state and last run report |
//! | `GET /api/stats` | catalog and run statistics |
//! | `GET /api/digest/latest` | most recent digest |

use crate::config::ServerConfig;
use crate::error::{FatalError, UpdateError, ValidationError};
use crate::models::{Category, Digest, Source};
use crate::pipeline::Orchestrator;
use crate::registry::{NewSource, SourcePatch};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

/// Error response: a status code and `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl From<UpdateError> for ApiError {
    fn from(e: UpdateError) -> Self {
        match e {
            UpdateError::NotFound(e) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            UpdateError::Invalid(e) => e.into(),
        }
    }
}

impl From<FatalError> for ApiError {
    fn from(e: FatalError) -> Self {
        let status = match e {
            FatalError::AlreadyRunning => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/sources", get(list_sources).post(add_source))
        .route("/api/sources/validate", get(validate_sources))
        .route(
            "/api/sources/:name",
            patch(update_source).delete(remove_source),
        )
        .route("/api/crawl/run", post(start_run))
        .route("/api/status", get(status))
        .route("/api/stats", get(stats))
        .route("/api/digest/latest", get(latest_digest))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `config.host:config.port` and serve until `shutdown` completes.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("HTTP API shutting down");
        })
        .await
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET /api/sources",
            "POST /api/sources",
            "PATCH /api/sources/:name",
            "DELETE /api/sources/:name",
            "GET /api/sources/validate",
            "POST /api/crawl/run",
            "GET /api/status",
            "GET /api/stats",
            "GET /api/digest/latest",
        ],
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "state": state.orchestrator.state(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> Json<Vec<Source>> {
    let registry = state.orchestrator.registry().read().await;
    let sources = match query.category.filter(|c| !c.trim().is_empty()) {
        Some(category) => registry.list_by_category(&Category::from(category)),
        None => registry.list().to_vec(),
    };
    Json(sources)
}

async fn add_source(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewSource>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let mut registry = state.orchestrator.registry().write().await;
    let added = registry.add(new)?.clone();
    Ok((StatusCode::CREATED, Json(added)))
}

async fn update_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(changes): Json<SourcePatch>,
) -> ApiResult<Json<Source>> {
    let mut registry = state.orchestrator.registry().write().await;
    let updated = registry.update(&name, changes)?.clone();
    Ok(Json(updated))
}

async fn remove_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<Value> {
    let removed = state.orchestrator.registry().write().await.remove(&name);
    Json(json!({ "name": name, "removed": removed }))
}

async fn validate_sources(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.orchestrator.registry().read().await;
    let problems: Vec<String> = registry.validate_all().collect();
    Json(json!({ "valid": problems.is_empty(), "problems": problems }))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    sources: Option<Vec<String>>,
}

async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RunRequest>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let handle = state.orchestrator.spawn_run(request.sources.clone())?;
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Triggered run failed"),
            Err(e) => warn!(error = %e, "Triggered run panicked"),
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "sources": request.sources })),
    ))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "state": state.orchestrator.state(),
        "last_run": state.orchestrator.last_report().await,
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sources = state.orchestrator.registry().snapshot().await;
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for s in &sources {
        *by_category.entry(s.category.to_string()).or_default() += 1;
    }
    let last = state.orchestrator.last_report().await;
    let digest = state.orchestrator.latest_digest().await;
    Json(json!({
        "total_sources": sources.len(),
        "by_category": by_category,
        "last_run_at": last.as_ref().map(|r| r.started_at),
        "last_run_state": last.as_ref().map(|r| r.state),
        "last_digest_date": digest.as_ref().map(|d| d.date.clone()),
        "last_digest_articles": digest.as_ref().map(|d| d.total_article_count),
    }))
}

async fn latest_digest(State(state): State<Arc<AppState>>) -> ApiResult<Json<Digest>> {
    state
        .orchestrator
        .latest_digest()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no digest has been assembled yet"))
}
