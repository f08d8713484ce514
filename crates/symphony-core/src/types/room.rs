//! Sibling execution nodes (rooms) and their registry wire types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a registered room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Online,
    Offline,
    Degraded,
}

/// A sibling execution node capable of running instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub room_name: String,
    /// Open set: "server", "ios", "local", ...
    pub room_type: String,
    pub url: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub instruments: Vec<String>,
    pub status: RoomStatus,
    /// Reported load in [0, 1]; used as a scoring tie-break.
    #[serde(default)]
    pub load: f64,
    pub last_seen_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Room {
    pub fn is_online(&self) -> bool {
        self.status == RoomStatus::Online
    }

    pub fn has_capabilities(&self, required: &[&str]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(*cap))
    }
}

/// Registration request from a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRegistration {
    pub room_id: String,
    pub room_name: String,
    #[serde(default = "RoomRegistration::default_room_type")]
    pub room_type: String,
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub instruments: Vec<String>,
}

impl RoomRegistration {
    fn default_room_type() -> String {
        "local".to_string()
    }
}

/// Heartbeat from a room; piggybacks knowledge sync state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHeartbeat {
    pub room_id: String,
    #[serde(default = "RoomHeartbeat::default_status")]
    pub status: RoomStatus,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub load: Option<f64>,
    /// Highest knowledge version the room has already synced.
    #[serde(default)]
    pub last_knowledge_version: Option<u64>,
}

impl RoomHeartbeat {
    fn default_status() -> RoomStatus {
        RoomStatus::Online
    }
}

/// Heartbeat acknowledgement carrying the knowledge delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHeartbeatAck {
    pub known: bool,
    pub knowledge_version: u64,
    #[serde(default)]
    pub knowledge_delta: Vec<KnowledgeEntry>,
}

/// A versioned knowledge entry synced to rooms on heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub version: u64,
    pub topic: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}
