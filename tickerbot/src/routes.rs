//! HTTP routes for the dashboard JSON API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::data::{ProviderStats, Quote, Symbol};
use crate::metrics::SentimentSnapshot;
use crate::scheduler::JobStatus;
use crate::watchlist::{AddOutcome, RemoveOutcome};
use crate::{AppState, Research, SymbolIndicators};

/// Upper bound for a single request; research calls wait on the LLM.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Build the dashboard router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/watchlist", get(get_watchlist).post(add_symbol))
        .route("/api/v1/watchlist/:symbol", delete(remove_symbol))
        .route("/api/v1/quote/:symbol", get(get_quote))
        .route("/api/v1/indicators/:symbol", get(get_indicators))
        .route("/api/v1/sentiment", get(get_sentiment))
        .route("/api/v1/jobs", get(get_jobs))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/research/:symbol", post(research))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error body: `{"error": "..."}` with the status of the underlying error.
#[derive(Debug)]
pub struct ApiError(tickerbot_common::Error);

impl<E: Into<tickerbot_common::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Dashboard request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_symbol(raw: &str) -> Result<Symbol, ApiError> {
    Ok(Symbol::parse(raw)?)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub uptime_secs: i64,
    pub watchlist_size: usize,
    pub jobs: usize,
    pub llm_enabled: bool,
    pub primary_disabled: bool,
}

#[derive(Debug, Serialize)]
pub struct WatchlistResponse {
    pub symbols: Vec<Symbol>,
    pub count: usize,
    /// Cached quotes only; the listing never triggers a fetch
    pub quotes: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
pub struct AddSymbolRequest {
    pub symbol: String,
}

#[derive(Debug, Serialize)]
pub struct WatchlistChange {
    pub symbol: Symbol,
    pub changed: bool,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResearchRequest {
    #[serde(default)]
    pub question: Option<String>,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "tickerbot",
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        watchlist_size: state.watchlist.len(),
        jobs: state.scheduler.len(),
        llm_enabled: state.llm.is_some(),
        primary_disabled: state.provider.primary_disabled(),
    })
}

pub async fn get_watchlist(State(state): State<Arc<AppState>>) -> Json<WatchlistResponse> {
    let symbols = state.watchlist.list();
    let quotes = symbols
        .iter()
        .filter_map(|s| state.provider.cached_quote(s))
        .collect();
    Json(WatchlistResponse {
        count: symbols.len(),
        symbols,
        quotes,
    })
}

pub async fn add_symbol(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddSymbolRequest>,
) -> Result<(StatusCode, Json<WatchlistChange>), ApiError> {
    let symbol = parse_symbol(&req.symbol)?;
    let outcome = state.watchlist.add(symbol.clone())?;
    let status = match outcome {
        AddOutcome::Added => StatusCode::CREATED,
        AddOutcome::AlreadyPresent => StatusCode::OK,
    };
    Ok((
        status,
        Json(WatchlistChange {
            symbol,
            changed: outcome == AddOutcome::Added,
            count: state.watchlist.len(),
        }),
    ))
}

pub async fn remove_symbol(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<WatchlistChange> {
    let symbol = parse_symbol(&raw)?;
    match state.watchlist.remove(&symbol)? {
        RemoveOutcome::Removed => Ok(Json(WatchlistChange {
            symbol,
            changed: true,
            count: state.watchlist.len(),
        })),
        RemoveOutcome::NotFound => Err(ApiError(tickerbot_common::Error::NotFound(format!(
            "{symbol} is not in the watchlist"
        )))),
    }
}

pub async fn get_quote(State(state): State<Arc<AppState>>, Path(raw): Path<String>) -> ApiResult<Quote> {
    Ok(Json(state.quote(&raw).await?))
}

pub async fn get_indicators(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<SymbolIndicators> {
    let symbol = parse_symbol(&raw)?;
    Ok(Json(state.indicators(&symbol).await?))
}

pub async fn get_sentiment(State(state): State<Arc<AppState>>) -> Json<SentimentSnapshot> {
    Json(state.sentiment.snapshot().await)
}

pub async fn get_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatus>> {
    Json(state.job_status())
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ProviderStats> {
    Json(state.provider.stats())
}

pub async fn research(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    body: Option<Json<ResearchRequest>>,
) -> ApiResult<Research> {
    let symbol = parse_symbol(&raw)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.research(&symbol, req.question.as_deref()).await?))
}
