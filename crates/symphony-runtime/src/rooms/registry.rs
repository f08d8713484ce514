//! Room registry: tracks sibling execution nodes and their health.
//!
//! The server self-registers as a room so local and remote execution
//! are first-class in scoring. Rooms not seen within the heartbeat
//! timeout are marked offline. Heartbeats piggyback knowledge sync: the
//! ack carries the delta of knowledge entries past the caller's last
//! synced version.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use symphony_core::types::{
    KnowledgeEntry, Room, RoomHeartbeat, RoomHeartbeatAck, RoomRegistration, RoomStatus,
};

pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Registry of connected rooms plus the shared knowledge journal.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    knowledge: Mutex<Vec<KnowledgeEntry>>,
    knowledge_version: AtomicU64,
    heartbeat_timeout: Duration,
    self_room_id: String,
}

impl RoomRegistry {
    /// Create the registry with the server registered as its own room.
    pub fn new(self_registration: RoomRegistration) -> Self {
        let self_room_id = self_registration.room_id.clone();
        let registry = Self {
            rooms: Mutex::new(HashMap::new()),
            knowledge: Mutex::new(Vec::new()),
            knowledge_version: AtomicU64::new(0),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            self_room_id,
        };
        registry.register(self_registration);
        registry
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Room>> {
        match self.rooms.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn self_room_id(&self) -> &str {
        &self.self_room_id
    }

    pub fn is_self(&self, room_id: &str) -> bool {
        self.self_room_id == room_id
    }

    /// Register a new room or replace an existing registration.
    pub fn register(&self, registration: RoomRegistration) -> Room {
        let now = Utc::now();
        let room = Room {
            room_id: registration.room_id.clone(),
            room_name: registration.room_name,
            room_type: registration.room_type,
            url: registration.url,
            capabilities: registration.capabilities.into_iter().collect(),
            instruments: registration.instruments,
            status: RoomStatus::Online,
            load: 0.0,
            last_seen_at: now,
            registered_at: now,
        };
        tracing::info!(
            room_id = %room.room_id,
            room_type = %room.room_type,
            url = %room.url,
            "room registered"
        );
        self.lock().insert(registration.room_id, room.clone());
        room
    }

    pub fn deregister(&self, room_id: &str) -> bool {
        if self.is_self(room_id) {
            return false;
        }
        let removed = self.lock().remove(room_id).is_some();
        if removed {
            tracing::info!(room_id = %room_id, "room deregistered");
        }
        removed
    }

    /// Process a room heartbeat; returns `None` for unknown rooms.
    pub fn heartbeat(&self, heartbeat: RoomHeartbeat) -> Option<RoomHeartbeatAck> {
        {
            let mut rooms = self.lock();
            let room = rooms.get_mut(&heartbeat.room_id)?;
            room.last_seen_at = Utc::now();
            room.status = heartbeat.status;
            if let Some(capabilities) = heartbeat.capabilities {
                room.capabilities = capabilities.into_iter().collect();
            }
            if let Some(load) = heartbeat.load {
                room.load = load.clamp(0.0, 1.0);
            }
        }

        let current_version = self.knowledge_version.load(Ordering::SeqCst);
        let since = heartbeat.last_knowledge_version.unwrap_or(current_version);
        let delta = {
            let knowledge = match self.knowledge.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            knowledge
                .iter()
                .filter(|entry| entry.version > since)
                .cloned()
                .collect()
        };

        Some(RoomHeartbeatAck {
            known: true,
            knowledge_version: current_version,
            knowledge_delta: delta,
        })
    }

    /// Append a knowledge entry; rooms pick it up on their next
    /// heartbeat.
    pub fn publish_knowledge(
        &self,
        topic: impl Into<String>,
        content: impl Into<String>,
    ) -> KnowledgeEntry {
        let version = self.knowledge_version.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = KnowledgeEntry {
            id: uuid::Uuid::new_v4().to_string(),
            version,
            topic: topic.into(),
            content: content.into(),
            updated_at: Utc::now(),
        };
        match self.knowledge.lock() {
            Ok(mut guard) => guard.push(entry.clone()),
            Err(poisoned) => poisoned.into_inner().push(entry.clone()),
        }
        entry
    }

    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.sweep_offline();
        self.lock().get(room_id).cloned()
    }

    pub fn all(&self) -> Vec<Room> {
        self.sweep_offline();
        let rooms = self.lock();
        let mut all: Vec<Room> = rooms.values().cloned().collect();
        all.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        all
    }

    pub fn online(&self) -> Vec<Room> {
        self.all().into_iter().filter(Room::is_online).collect()
    }

    /// Mark rooms not seen within the timeout as offline. The self room
    /// is exempt.
    pub fn sweep_offline(&self) -> usize {
        let mut rooms = self.lock();
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let mut marked = 0;
        for room in rooms.values_mut() {
            if room.room_id == self.self_room_id {
                continue;
            }
            if room.status == RoomStatus::Online && now - room.last_seen_at > timeout {
                room.status = RoomStatus::Offline;
                marked += 1;
                tracing::warn!(room_id = %room.room_id, "room marked offline");
            }
        }
        marked
    }

    /// Pick the best room for an instrument's capability set.
    ///
    /// Scoring: online rooms whose capabilities superset the required
    /// set; locality-required pins execution to the self room; then
    /// lower reported load wins, with lexicographic room_id as the
    /// deterministic tie-break.
    pub fn select_room(&self, required: &[&str], locality_required: bool) -> Option<Room> {
        self.sweep_offline();
        let rooms = self.lock();

        if locality_required {
            return rooms.get(&self.self_room_id).cloned();
        }

        let mut candidates: Vec<&Room> = rooms
            .values()
            .filter(|room| room.is_online() && room.has_capabilities(required))
            .collect();
        candidates.sort_by(|a, b| {
            a.load
                .partial_cmp(&b.load)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        candidates.first().map(|room| (*room).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_registration() -> RoomRegistration {
        RoomRegistration {
            room_id: "server".to_string(),
            room_name: "Symphony Server".to_string(),
            room_type: "server".to_string(),
            url: "http://127.0.0.1:8000".to_string(),
            capabilities: vec![
                "reasoning".to_string(),
                "web_search".to_string(),
                "vision".to_string(),
                "synthesis".to_string(),
            ],
            instruments: vec!["note".to_string(), "research".to_string()],
        }
    }

    fn remote(room_id: &str, capabilities: Vec<&str>) -> RoomRegistration {
        RoomRegistration {
            room_id: room_id.to_string(),
            room_name: room_id.to_string(),
            room_type: "local".to_string(),
            url: format!("http://{}:9000", room_id),
            capabilities: capabilities.into_iter().map(str::to_string).collect(),
            instruments: vec![],
        }
    }

    fn report_load(registry: &RoomRegistry, room_id: &str, load: f64) {
        registry.heartbeat(RoomHeartbeat {
            room_id: room_id.to_string(),
            status: RoomStatus::Online,
            capabilities: None,
            load: Some(load),
            last_knowledge_version: None,
        });
    }

    #[test]
    fn test_scoring_prefers_lower_load_then_lexicographic() {
        let registry = RoomRegistry::new(server_registration());
        registry.register(remote("zeta", vec!["reasoning"]));
        registry.register(remote("alpha", vec!["reasoning"]));
        registry.register(remote("busy", vec!["reasoning"]));

        report_load(&registry, "server", 0.5);
        report_load(&registry, "zeta", 0.2);
        report_load(&registry, "alpha", 0.2);
        report_load(&registry, "busy", 0.9);

        // Lowest load wins; lexicographic room_id breaks the tie.
        let best = registry.select_room(&["reasoning"], false).unwrap();
        assert_eq!(best.room_id, "alpha");

        // Load changes reorder the candidates.
        report_load(&registry, "alpha", 0.95);
        let best = registry.select_room(&["reasoning"], false).unwrap();
        assert_eq!(best.room_id, "zeta");
    }

    #[test]
    fn test_capability_superset_filter() {
        let registry = RoomRegistry::new(server_registration());
        registry.register(remote("limited", vec!["reasoning"]));

        let best = registry
            .select_room(&["reasoning", "web_search"], false)
            .unwrap();
        assert_eq!(best.room_id, "server");
    }

    #[test]
    fn test_locality_required_pins_to_self() {
        let registry = RoomRegistry::new(server_registration());
        registry.register(remote("idle", vec!["reasoning"]));

        let best = registry.select_room(&["reasoning"], true).unwrap();
        assert_eq!(best.room_id, "server");
    }

    #[test]
    fn test_stale_rooms_go_offline() {
        let registry =
            RoomRegistry::new(server_registration()).with_heartbeat_timeout(Duration::from_secs(0));
        registry.register(remote("flaky", vec!["reasoning"]));

        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.sweep_offline() >= 1);
        assert_eq!(
            registry.get("flaky").unwrap().status,
            RoomStatus::Offline
        );
        // Offline rooms are no longer candidates.
        let best = registry.select_room(&["reasoning"], false).unwrap();
        assert_eq!(best.room_id, "server");
    }

    #[test]
    fn test_heartbeat_refreshes_and_syncs_knowledge() {
        let registry = RoomRegistry::new(server_registration());
        registry.register(remote("ios-1", vec!["reasoning"]));

        registry.publish_knowledge("preferences", "user prefers metric units");
        registry.publish_knowledge("routing", "avoid paid APIs after 22:00");

        let ack = registry
            .heartbeat(RoomHeartbeat {
                room_id: "ios-1".to_string(),
                status: RoomStatus::Online,
                capabilities: None,
                load: Some(0.4),
                last_knowledge_version: Some(1),
            })
            .unwrap();

        assert_eq!(ack.knowledge_version, 2);
        assert_eq!(ack.knowledge_delta.len(), 1);
        assert_eq!(ack.knowledge_delta[0].topic, "routing");

        // Unknown rooms get no ack.
        assert!(registry
            .heartbeat(RoomHeartbeat {
                room_id: "ghost".to_string(),
                status: RoomStatus::Online,
                capabilities: None,
                load: None,
                last_knowledge_version: None,
            })
            .is_none());
    }
}
