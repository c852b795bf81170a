//! vdig-ai library interface
//!
//! Task orchestration for video transcript digests: submissions are
//! expanded into tasks, each task acquires a transcript (remote subtitles,
//! then local files, then ASR) and generates the requested artifacts.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;

pub use crate::engine::{EngineDeps, TaskEngine};
pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TaskEngine>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<TaskEngine>) -> Self {
        Self {
            engine,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::task_routes())
        .merge(api::catalog_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
