//! Heartbeat CRUD and the forced scheduler tick. Auth required.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use symphony_core::types::Heartbeat;
use symphony_runtime::HeartbeatScheduler;

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HeartbeatCreate {
    name: String,
    query_template: String,
    cron_expression: String,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    context_template: Option<Value>,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default = "HeartbeatCreate::default_active")]
    is_active: bool,
}

impl HeartbeatCreate {
    fn default_active() -> bool {
        true
    }
}

pub async fn create_heartbeat(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<HeartbeatCreate>,
) -> Result<(StatusCode, Json<Heartbeat>), ApiError> {
    let scope = auth.require()?;
    HeartbeatScheduler::validate_cron(&body.cron_expression)
        .map_err(|err| ApiError::BadRequest(format!("invalid cron expression: {}", err)))?;

    let now = Utc::now();
    let heartbeat = Heartbeat {
        id: uuid::Uuid::new_v4().to_string(),
        app_id: Some(scope.app_id().to_string()),
        user_id: scope.user_id().map(str::to_string),
        name: body.name,
        query_template: body.query_template,
        cron_expression: body.cron_expression,
        timezone: body.timezone.unwrap_or_else(|| "UTC".to_string()),
        context_template: body.context_template,
        webhook_url: body.webhook_url,
        is_active: body.is_active,
        created_at: now,
        updated_at: now,
    };
    state.heartbeats.upsert(&heartbeat).await?;
    Ok((StatusCode::CREATED, Json(heartbeat)))
}

pub async fn list_heartbeats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<Heartbeat>>, ApiError> {
    let scope = auth.require()?.clone();
    Ok(Json(state.heartbeats.list(Some(&scope)).await?))
}

pub async fn get_heartbeat(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(heartbeat_id): Path<String>,
) -> Result<Json<Heartbeat>, ApiError> {
    let scope = auth.require()?.clone();
    let heartbeat = state
        .heartbeats
        .get(&heartbeat_id, Some(&scope))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("heartbeat {} not found", heartbeat_id)))?;
    Ok(Json(heartbeat))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatUpdate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    query_template: Option<String>,
    #[serde(default)]
    cron_expression: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    context_template: Option<Value>,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
}

pub async fn update_heartbeat(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(heartbeat_id): Path<String>,
    Json(body): Json<HeartbeatUpdate>,
) -> Result<Json<Heartbeat>, ApiError> {
    let scope = auth.require()?.clone();
    let mut heartbeat = state
        .heartbeats
        .get(&heartbeat_id, Some(&scope))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("heartbeat {} not found", heartbeat_id)))?;

    if let Some(cron_expression) = &body.cron_expression {
        HeartbeatScheduler::validate_cron(cron_expression)
            .map_err(|err| ApiError::BadRequest(format!("invalid cron expression: {}", err)))?;
        heartbeat.cron_expression = cron_expression.clone();
    }
    if let Some(name) = body.name {
        heartbeat.name = name;
    }
    if let Some(query_template) = body.query_template {
        heartbeat.query_template = query_template;
    }
    if let Some(timezone) = body.timezone {
        heartbeat.timezone = timezone;
    }
    if let Some(context_template) = body.context_template {
        heartbeat.context_template = Some(context_template);
    }
    if let Some(webhook_url) = body.webhook_url {
        heartbeat.webhook_url = Some(webhook_url);
    }
    if let Some(is_active) = body.is_active {
        heartbeat.is_active = is_active;
    }
    heartbeat.updated_at = Utc::now();

    state.heartbeats.upsert(&heartbeat).await?;
    Ok(Json(heartbeat))
}

pub async fn delete_heartbeat(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(heartbeat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = auth.require()?.clone();
    let deleted = state.heartbeats.delete(&heartbeat_id, Some(&scope)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!(
            "heartbeat {} not found",
            heartbeat_id
        )));
    }
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "RunsQuery::default_limit")]
    limit: usize,
}

impl RunsQuery {
    fn default_limit() -> usize {
        20
    }
}

pub async fn list_runs(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(heartbeat_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = auth.require()?.clone();
    // Scoped existence check first.
    state
        .heartbeats
        .get(&heartbeat_id, Some(&scope))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("heartbeat {} not found", heartbeat_id)))?;

    let runs = state
        .heartbeats
        .list_runs(&heartbeat_id, query.limit.min(200))
        .await?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn force_tick(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require()?;
    let fired = state.scheduler.tick_now().await;
    Ok(Json(json!({ "fired": fired })))
}
