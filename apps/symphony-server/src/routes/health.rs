//! Liveness and system health surfaces.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.registry.tool_names(),
    }))
}

pub async fn health_system(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut tools = serde_json::Map::new();
    for (name, status) in state.registry.health_check_all().await {
        let value = match status {
            Ok(()) => json!("ok"),
            Err(err) => json!({ "error": err.to_string() }),
        };
        tools.insert(name, value);
    }

    let rooms = state.rooms.all();
    Json(json!({
        "status": "ok",
        "tools": tools,
        "tasks": state.service.manager().stats(),
        "rooms": {
            "total": rooms.len(),
            "online": rooms.iter().filter(|room| room.is_online()).count(),
        },
        "pending_approvals": state.service.approvals().pending_count(),
        "error_patterns": state.service.errors().patterns(),
    }))
}

pub async fn health_database(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .directory
        .ping()
        .await
        .map_err(|err| ApiError::Internal(format!("database unavailable: {}", err)))?;
    Ok(Json(json!({ "status": "ok" })))
}
