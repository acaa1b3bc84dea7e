//! Read-only HTTP API over the persisted outputs
//!
//! Nothing here touches the chain: every response comes from the cache
//! document, the chart files or the record store.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use yield_core::WindowKind;

use crate::charts;
use crate::config::Config;
use crate::constants;
use crate::store::{Page, Store};

// =============================================================================
// Errors
// =============================================================================

/// API error rendered as `{"error": message}`
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not_found: {msg}"),
            Self::Internal(msg) => write!(f, "internal_error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

// =============================================================================
// State and Routes
// =============================================================================

pub struct AppState {
    pub cache_path: PathBuf,
    pub charts_dir: PathBuf,
    pub store: Store,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/crvlol/info", get(info))
        .route("/api/crvlol/chart-data/{chart}/{peg}", get(chart_data))
        .route("/api/crvlol/harvests", get(harvests))
        .route("/api/crvlol/staking", get(staking))
        .route("/charts/{name}/{peg}", get(chart_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: &Config, store: Store) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        cache_path: config.cache_path.clone(),
        charts_dir: config.charts_dir.clone(),
        store,
    });

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("crvlol API listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping");
}

// =============================================================================
// Pagination
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    per_page: Option<String>,
    account: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pagination {
    page: u32,
    per_page: u32,
}

impl Pagination {
    /// Unparseable or out-of-range values fall back to page 1 / default size
    fn from_query(query: &PageQuery) -> Self {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());

        let page = parse(&query.page).unwrap_or(1);
        let page = if page < 1 { 1 } else { page.min(u32::MAX as i64) as u32 };

        let per_page = parse(&query.per_page).unwrap_or(constants::DEFAULT_PAGE_SIZE as i64);
        let per_page = if per_page < 1 || per_page > constants::MAX_PAGE_SIZE as i64 {
            constants::DEFAULT_PAGE_SIZE
        } else {
            per_page as u32
        };

        Self { page, per_page }
    }

    fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }

    fn limit(&self) -> u64 {
        self.per_page as u64
    }
}

#[derive(Debug, Serialize)]
struct PageResponse<T> {
    page: u32,
    per_page: u32,
    total: u64,
    data: Vec<T>,
}

impl<T> PageResponse<T> {
    fn new(pagination: Pagination, page: Page<T>) -> Self {
        Self {
            page: pagination.page,
            per_page: pagination.per_page,
            total: page.total,
            data: page.items,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The whole cache document, as persisted
async fn info(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let contents = tokio::fs::read_to_string(&state.cache_path).await?;
    Ok(Json(serde_json::from_str(&contents)?))
}

/// `chart_data` key holding a series
fn series_key(kind: WindowKind, adjust_for_peg: bool) -> &'static str {
    match (kind, adjust_for_peg) {
        (WindowKind::Weekly, false) => "weekly_aprs",
        (WindowKind::Weekly, true) => "weekly_aprs_peg",
        (WindowKind::TrailingAnchors, false) => "apr_since",
        (WindowKind::TrailingAnchors, true) => "apr_since_peg",
    }
}

async fn chart_data(
    State(state): State<Arc<AppState>>,
    Path((chart, peg)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = WindowKind::from_title(&chart)
        .ok_or_else(|| ApiError::NotFound(format!("unknown chart '{chart}'")))?;
    let key = series_key(kind, charts::parse_peg(&peg));

    let contents = match tokio::fs::read_to_string(&state.cache_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("no chart data yet".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut document: Value = serde_json::from_str(&contents)?;

    document
        .get_mut("chart_data")
        .and_then(|c| c.get_mut(key))
        .map(|series| Json(series.take()))
        .ok_or_else(|| ApiError::NotFound(format!("chart_data has no '{key}'")))
}

async fn harvests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = Pagination::from_query(&query);
    let page = state
        .store
        .get_harvests(pagination.offset(), pagination.limit())
        .await?;
    Ok(Json(PageResponse::new(pagination, page)))
}

async fn staking(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = Pagination::from_query(&query);
    let account = query.account.as_deref().filter(|a| !a.is_empty());
    let page = state
        .store
        .get_staking_weeks(account, pagination.offset(), pagination.limit())
        .await?;
    Ok(Json(PageResponse::new(pagination, page)))
}

/// Most recent chart file for a series
async fn chart_file(
    State(state): State<Arc<AppState>>,
    Path((name, peg)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound("File not found".to_string());
    let kind = WindowKind::from_title(&name).ok_or_else(not_found)?;
    let path = charts::latest_chart(&state.charts_dir, kind, charts::parse_peg(&peg))?
        .ok_or_else(not_found)?;

    let body = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
