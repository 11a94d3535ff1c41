//! HTTP API over the scheduler and repository
//!
//! Routes:
//! - `POST /api/trigger-scrape`: admit a manual run (202) or report the active one (409)
//! - `GET /api/scrape-status`: scheduler snapshot
//! - `GET /api/films`: filtered, paginated listing
//! - `GET /api/films/{key}`: one film by identity key
//! - `GET /api/stats`: catalog statistics
//! - `POST /api/export`: write an export file
//! - `GET /health`: liveness

use crate::film::{FilmRecord, IdentityKey, ReleaseStatus};
use crate::ingest::Scheduler;
use crate::output::{self, ExportFormat, OutputError};
use crate::state::TriggerSource;
use crate::storage::{FilmFilter, Repository, StorageError};
use crate::TrackerError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Page size when the caller gives none
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub repository: Arc<dyn Repository>,
    pub export_dir: PathBuf,
}

impl AppState {
    pub fn new(
        scheduler: Scheduler,
        repository: Arc<dyn Repository>,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scheduler,
            repository,
            export_dir: export_dir.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/trigger-scrape", post(trigger_scrape_handler))
        .route("/api/scrape-status", get(scrape_status_handler))
        .route("/api/films", get(films_handler))
        .route("/api/films/{key}", get(film_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/export", post(export_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(state))
}

/// Serves the API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Handler failure, rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => {
                tracing::error!("API request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<OutputError> for ApiError {
    fn from(e: OutputError) -> Self {
        match e {
            OutputError::UnknownFormat(_) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

async fn trigger_scrape_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.trigger(TriggerSource::Manual) {
        Ok(accepted) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "accepted": true,
                "run_id": accepted.run_id,
                "started_at": accepted.started_at,
            })),
        )
            .into_response(),
        Err(active) => (
            StatusCode::CONFLICT,
            Json(json!({
                "accepted": false,
                "reason": "already-running",
                "active_run_id": active.active_run_id,
            })),
        )
            .into_response(),
    }
}

async fn scrape_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.status()).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct FilmsQuery {
    status: Option<String>,
    search: Option<String>,
    offset: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FilmsPage {
    total: u64,
    offset: u64,
    limit: u64,
    films: Vec<FilmRecord>,
}

async fn films_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilmsQuery>,
) -> Result<Json<FilmsPage>, ApiError> {
    let mut filter = FilmFilter::default();

    match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => {}
        Some(status) => {
            let status: ReleaseStatus = status.parse().map_err(ApiError::BadRequest)?;
            filter = filter.with_status(status);
        }
    }
    if let Some(search) = query.search {
        filter = filter.with_search(search);
    }

    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let total = state.repository.count_matching(&filter)?;
    let films = state.repository.list(&filter.page(offset, limit))?;

    Ok(Json(FilmsPage {
        total,
        offset,
        limit,
        films,
    }))
}

async fn film_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<FilmRecord>, ApiError> {
    let key: IdentityKey = key.parse().map_err(ApiError::BadRequest)?;
    state
        .repository
        .get(&key)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no film with key '{}'", key)))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    statistics: output::CatalogStatistics,
    scrape_in_progress: bool,
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let statistics = output::load_statistics(state.repository.as_ref())?;
    Ok(Json(StatsResponse {
        statistics,
        scrape_in_progress: state.scheduler.status().is_running(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        Some(format) => format.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };

    let repository = Arc::clone(&state.repository);
    let dir = state.export_dir.clone();
    let summary = tokio::task::spawn_blocking(move || {
        output::export_films(repository.as_ref(), &dir, format)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("export task failed: {}", e)))??;

    Ok(Json(summary).into_response())
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
    .into_response()
}
