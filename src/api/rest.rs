// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Three routes: a public health probe, the enriched-candle query, and the
// LLM-backed analysis. Core faults surface through `ApiError`, which maps
// caller faults to 400 and internal faults to 500.
//
// CORS origins come from configuration; `*` keeps the permissive
// development default.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Settings;
use crate::deriv::DerivClient;
use crate::error::ApiError;
use crate::llm::LlmClient;
use crate::pipeline::{self, CandleView};
use crate::types::Timeframe;

/// Shared handler state: immutable clients, nothing else. Per-request work
/// owns all of its mutable state.
pub struct AppState {
    pub deriv: DerivClient,
    pub llm: LlmClient,
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>, settings: &Settings) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/candles", get(get_candles))
        .route("/api/analyze", post(analyze_market))
        .layer(build_cors(&settings.cors_allow_origins))
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Candles
// =============================================================================

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_count() -> u32 {
    200
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    /// Instrument code, e.g. BOOM500 or CRASH500.
    symbol: String,
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_count")]
    count: u32,
}

async fn get_candles(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CandlesQuery>,
) -> Result<Json<CandleView>, ApiError> {
    let timeframe = Timeframe::parse(&q.timeframe)?;
    let count = validate_count(q.count, 50, 600)?;

    let view = pipeline::build_candle_view(&state.deriv, &q.symbol, timeframe, count).await?;
    Ok(Json(view))
}

// =============================================================================
// Analysis
// =============================================================================

async fn analyze_market(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CandlesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe = Timeframe::parse(&q.timeframe)?;
    let count = validate_count(q.count, 50, 400)?;

    let analysis =
        pipeline::analyze_market(&state.deriv, &state.llm, &q.symbol, timeframe, count).await?;
    Ok(Json(json!({ "analysis": analysis })))
}

// =============================================================================
// Validation
// =============================================================================

/// Bound-check the candle count; the provider rejects oversized requests
/// anyway, but failing locally gives the caller a clear message.
fn validate_count(count: u32, min: u32, max: u32) -> Result<u32, ApiError> {
    if count < min || count > max {
        return Err(ApiError::BadRequest(format!(
            "count must be between {min} and {max}, got {count}"
        )));
    }
    Ok(count)
}
