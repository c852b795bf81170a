//! Lookup lists for submission forms
//!
//! GET /api/models, GET /api/workspaces

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkspacesResponse {
    pub workspaces: Vec<String>,
}

/// GET /api/models
///
/// Names only; endpoints and keys stay server-side.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.engine.models().names(),
    })
}

/// GET /api/workspaces
pub async fn list_workspaces(State(state): State<AppState>) -> ApiResult<Json<WorkspacesResponse>> {
    let workspaces = state
        .engine
        .workspaces()
        .list()
        .map_err(|e| ApiError::Internal(format!("Failed to list workspaces: {}", e)))?;
    Ok(Json(WorkspacesResponse { workspaces }))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/workspaces", get(list_workspaces))
}
