// =============================================================================
// Deriv Pulse — Main Entry Point
// =============================================================================
//
// Backend for the Deriv trading dashboard: serves enriched candle history
// (EMA 20/50/100/200) and LLM-generated market narratives over REST.
// =============================================================================

mod api;
mod config;
mod deriv;
mod error;
mod indicators;
mod llm;
mod pipeline;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::rest::AppState;
use crate::config::Settings;
use crate::deriv::DerivClient;
use crate::llm::LlmClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Deriv Pulse backend starting up");

    let settings = Settings::from_env();
    if settings.llm_api_key.is_none() {
        warn!("LLM_API_KEY not set — /api/analyze will return a configuration notice");
    }

    // ── 2. Build clients & shared state ──────────────────────────────────
    let state = Arc::new(AppState {
        deriv: DerivClient::from_settings(&settings),
        llm: LlmClient::from_settings(&settings),
    });

    // ── 3. Serve ─────────────────────────────────────────────────────────
    let app = api::rest::router(state, &settings);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Deriv Pulse shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    warn!("Shutdown signal received — stopping gracefully");
}
