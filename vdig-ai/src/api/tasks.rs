//! Task API handlers
//!
//! POST /api/tasks, GET /api/tasks, GET /api/tasks/:id, POST /api/tasks/:id/stop

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;
use vdig_common::TaskStatus;

use crate::{
    engine::StoreError,
    error::{ApiError, ApiResult},
    models::{Submission, SubmissionResult, Task},
    AppState,
};

/// POST /api/tasks response
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub result: SubmissionResult,
    pub message: String,
}

/// GET /api/tasks response
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    /// Whether any task is still pending or running
    pub active: bool,
}

/// POST /api/tasks/:id/stop response
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// POST /api/tasks
///
/// Validates and expands the submission. Returns 202 Accepted; tasks run in
/// the background and are observed by polling.
pub async fn submit_tasks(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let result = state.engine.submit(submission).await?;
    let message = result.message();

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { result, message })))
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<TaskListResponse> {
    let tasks = state.engine.poll_status().await;
    let active = tasks.iter().any(|t| !t.is_terminal());
    Json(TaskListResponse { tasks, active })
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    state
        .engine
        .get(task_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {}", task_id)))
}

/// POST /api/tasks/:id/stop
///
/// Idempotent; stopping a finished task reports its terminal status.
pub async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<StopResponse>> {
    match state.engine.request_stop(task_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(id)) => {
            return Err(ApiError::NotFound(format!("Task not found: {}", id)))
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    let task = state
        .engine
        .get(task_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {}", task_id)))?;

    Ok(Json(StopResponse {
        task_id,
        status: task.status,
    }))
}

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", post(submit_tasks).get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/stop", post(stop_task))
}
