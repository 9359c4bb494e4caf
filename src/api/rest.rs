// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health and the datafeed configuration
// are public; the service status requires a valid Bearer token checked via the
// `AuthBearer` extractor. Chart sessions run over the `/api/v1/chart`
// WebSocket (see `ws`).
//
// CORS is permissive: chart widgets are embedded from arbitrary origins.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::datafeed::DatafeedConfiguration;
use crate::resolution::{Resolution, ResolutionSpec};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/config", get(datafeed_config))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/status", get(status))
        // ── Chart sessions ──────────────────────────────────────────
        .route("/api/v1/chart", get(crate::api::ws::chart_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        active_sessions: state
            .active_sessions
            .load(std::sync::atomic::Ordering::SeqCst),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Datafeed configuration (public)
// =============================================================================

#[derive(Serialize)]
struct ConfigResponse {
    datafeed: DatafeedConfiguration,
    resolutions: Vec<ResolutionSpec>,
}

fn config_response() -> ConfigResponse {
    ConfigResponse {
        datafeed: DatafeedConfiguration::default(),
        resolutions: Resolution::ALL.iter().map(|r| r.spec()).collect(),
    }
}

async fn datafeed_config() -> impl IntoResponse {
    Json(config_response())
}

// =============================================================================
// Status (authenticated)
// =============================================================================

async fn status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_status())
}
