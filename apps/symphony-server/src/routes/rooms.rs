//! Room registration, heartbeats and discovery.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use symphony_core::types::{Room, RoomHeartbeat, RoomHeartbeatAck, RoomRegistration, RoomStatus};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn register_room(
    State(state): State<AppState>,
    Json(registration): Json<RoomRegistration>,
) -> Result<Json<Room>, ApiError> {
    if registration.room_id.trim().is_empty() {
        return Err(ApiError::BadRequest("room_id must not be empty".to_string()));
    }
    Ok(Json(state.rooms.register(registration)))
}

pub async fn room_heartbeat(
    State(state): State<AppState>,
    Json(heartbeat): Json<RoomHeartbeat>,
) -> Result<Json<RoomHeartbeatAck>, ApiError> {
    let room_id = heartbeat.room_id.clone();
    state
        .rooms
        .heartbeat(heartbeat)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("room {} not registered", room_id)))
}

#[derive(Debug, Deserialize)]
pub struct DeregisterRequest {
    room_id: String,
}

pub async fn deregister_room(
    State(state): State<AppState>,
    Json(request): Json<DeregisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.rooms.deregister(&request.room_id);
    if !removed {
        return Err(ApiError::NotFound(format!(
            "room {} not registered",
            request.room_id
        )));
    }
    Ok(Json(json!({ "deregistered": true })))
}

pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.rooms.all())
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Room>, ApiError> {
    state
        .rooms
        .get(&room_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("room {} not registered", room_id)))
}

pub async fn rooms_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let rooms = state.rooms.all();
    let online = rooms
        .iter()
        .filter(|room| room.status == RoomStatus::Online)
        .count();
    let offline = rooms
        .iter()
        .filter(|room| room.status == RoomStatus::Offline)
        .count();
    let degraded = rooms
        .iter()
        .filter(|room| room.status == RoomStatus::Degraded)
        .count();
    Json(json!({
        "total": rooms.len(),
        "online": online,
        "offline": offline,
        "degraded": degraded,
        "self_room_id": state.rooms.self_room_id(),
    }))
}
