//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::engine::StatusCounts;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "stopping" once shutdown began
    pub status: String,
    /// Module name ("vdig-ai")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Git commit the binary was built from
    pub git_hash: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub max_concurrent: usize,
    pub tasks: StatusCounts,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let status = if state.engine.is_shutting_down() {
        "stopping"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "vdig-ai".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("VDIG_GIT_HASH").to_string(),
        uptime_seconds,
        max_concurrent: state.engine.max_concurrent(),
        tasks: state.engine.counts().await,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
