// =============================================================================
// Pool Chart Feed — Main Entry Point
// =============================================================================
//
// Serves resolution-bucketed OHLCV bars for launchpad pools to charting
// widgets. Each `/api/v1/chart` WebSocket connection is one chart instance
// with its own datafeed session.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod chart_config;
mod datafeed;
mod error;
mod live;
mod market_data;
mod readiness;
mod resolution;
mod runtime_config;
mod task;
mod types;
mod upstream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "chart_feed.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Pool Chart Feed starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_overrides(|key| std::env::var(key).ok());

    if std::env::var("CHART_FEED_API_TOKEN").unwrap_or_default().is_empty() {
        warn!("CHART_FEED_API_TOKEN is not set — /api/v1/status will reject every request");
    }

    info!(
        history_host = %config.history_host,
        enriched_host = %config.enriched_host,
        live_url = %config.live_url,
        page_limit = config.page_limit,
        "Upstreams configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config));

    // ── 3. Start the API server ──────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    // ── 4. Persist on shutdown ───────────────────────────────────────────
    if let Err(e) = state.chart_config.save_if_dirty() {
        error!(error = %e, "Failed to save chart preferences on shutdown");
    }
    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Pool Chart Feed shut down complete.");
    Ok(())
}
