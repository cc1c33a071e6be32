//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use punchlink_common::time;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Pushed records stamped before this instant (and outside the recency
    /// window) are treated as backlog
    pub process_start: String,
}

/// GET /health
///
/// No authentication; used by launchers and monitors.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "punchlink".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.startup_time.elapsed().as_secs(),
        process_start: time::to_wire(&state.recency.process_start()),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
