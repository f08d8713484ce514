//! Task submission, polling, approval and cancellation.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use symphony_core::types::{TaskPendingResponse, TaskRequest, TaskStatus, TaskSubmitResponse};

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn submit_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<TaskRequest>,
) -> Result<Json<TaskSubmitResponse>, ApiError> {
    let response = state.service.submit(request, auth.scope).await?;
    Ok(Json(response))
}

pub async fn approve_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSubmitResponse>, ApiError> {
    let response = state.service.approve(&task_id, auth.scope.as_ref()).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Request the full response even at trust level 2.
    #[serde(default)]
    full: bool,
}

pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Response, ApiError> {
    let record = state
        .service
        .tasks()
        .get_scoped(&task_id, auth.scope.as_ref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", task_id)))?;

    match record.status {
        TaskStatus::Complete => {
            let response = record
                .response
                .ok_or_else(|| ApiError::Internal("complete task has no response".to_string()))?;
            let minimal_surface = record
                .request
                .preferences
                .as_ref()
                .and_then(|p| p.trust_level)
                == Some(2);
            if minimal_surface && !query.full {
                Ok(Json(response.minimal()).into_response())
            } else {
                Ok(Json(response).into_response())
            }
        }
        TaskStatus::Failed => Err(ApiError::Internal(format!(
            "Task failed: {}",
            record.error.unwrap_or_else(|| "unknown error".to_string())
        ))),
        status => Ok(Json(TaskPendingResponse {
            task_id,
            status,
            progress: Some(format!("Task is {}", status.as_str())),
            started_at: Some(record.created_at),
        })
        .into_response()),
    }
}

pub async fn get_checkpoints(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    // Scoped existence check keeps cross-app checkpoint reads out.
    state
        .service
        .tasks()
        .get_scoped(&task_id, auth.scope.as_ref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", task_id)))?;

    let checkpoints = state.service.checkpoints().list(&task_id).await?;
    Ok(Json(checkpoints).into_response())
}

pub async fn cancel_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.service.cancel(&task_id, auth.scope.as_ref()).await?;
    Ok(Json(json!({ "task_id": task_id, "status": status })))
}

pub async fn active_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app_id = auth.scope.as_ref().map(|scope| scope.app_id().to_string());
    let active: Vec<_> = state
        .service
        .manager()
        .get_active(app_id.as_deref())
        .into_iter()
        .map(|task| task.view())
        .collect();
    let count = active.len();
    Ok(Json(json!({ "tasks": active, "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "RecentQuery::default_limit")]
    limit: usize,
}

impl RecentQuery {
    fn default_limit() -> usize {
        20
    }
}

pub async fn recent_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<RecentQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state
        .service
        .tasks()
        .list_recent(auth.scope.as_ref(), query.limit.min(200))
        .await?;
    let count = records.len();
    Ok(Json(json!({ "tasks": records, "count": count })))
}

pub async fn task_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(json!(state.service.manager().stats())))
}
