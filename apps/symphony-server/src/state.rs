//! Process bootstrap: tool registry, instruments, conductor, service,
//! scheduler, all behind one cloneable state container. Each component
//! is initialized exactly once per server.

use std::sync::Arc;
use std::time::Duration;

use symphony_config::Settings;
use symphony_core::store::{AppDirectory, HeartbeatStore};
use symphony_core::tool::{capability, ToolRegistry};
use symphony_instruments::InstrumentFactory;
use symphony_runtime::{Conductor, HeartbeatScheduler, RoomClient, RoomRegistry, TaskService, TaskServiceBuilder};
use symphony_stores::{
    InMemoryAppDirectory, InMemoryCheckpointStore, InMemoryHeartbeatStore, InMemoryTaskStore,
};
use symphony_tools::{ClaudeTool, TavilySearch};

use symphony_core::types::RoomRegistration;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
    pub scheduler: Arc<HeartbeatScheduler>,
    pub rooms: Arc<RoomRegistry>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub directory: Arc<dyn AppDirectory>,
    pub registry: Arc<ToolRegistry>,
    pub settings: Settings,
}

/// Build the whole runtime from settings.
///
/// Tool registration order is fixed so capability resolution stays
/// deterministic across restarts.
pub fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
    let mut registry = ToolRegistry::new();
    registry.register_reasoning(Arc::new(ClaudeTool::from_api_key(
        settings.claude_api_key.clone(),
    )));
    registry.register_search(Arc::new(TavilySearch::from_api_key(
        settings.tavily_api_key.clone(),
    )));
    let registry = Arc::new(registry);

    let factory = InstrumentFactory::new(registry.clone());
    let instruments = factory.build_baseline()?;

    let rooms = Arc::new(RoomRegistry::new(RoomRegistration {
        room_id: "server".to_string(),
        room_name: "Symphony Server".to_string(),
        room_type: "server".to_string(),
        url: format!("http://{}:{}", settings.host, settings.port),
        capabilities: vec![
            capability::REASONING.to_string(),
            capability::WEB_SEARCH.to_string(),
            capability::VISION.to_string(),
            capability::SYNTHESIS.to_string(),
        ],
        instruments: instruments.keys().cloned().collect(),
    }));
    let room_client = Arc::new(RoomClient::default());

    let conductor = Arc::new(
        Conductor::new(instruments).with_rooms(rooms.clone(), room_client),
    );

    let heartbeats: Arc<dyn HeartbeatStore> = Arc::new(InMemoryHeartbeatStore::new());
    let directory: Arc<dyn AppDirectory> = Arc::new(InMemoryAppDirectory::new());

    if settings.supabase_url.is_some() {
        // Durable backends implement the same store traits in their own
        // crate; this build runs on the in-memory backend.
        tracing::warn!("SUPABASE_URL set but no durable backend is linked; using in-memory stores");
    }

    let service = TaskServiceBuilder::new(
        conductor,
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(InMemoryCheckpointStore::new()),
    )
    .build();

    let scheduler = Arc::new(
        HeartbeatScheduler::new(heartbeats.clone(), service.clone()).with_tick_interval(
            Duration::from_secs(settings.autonomic_heartbeat_interval.max(1)),
        ),
    );

    Ok(AppState {
        service,
        scheduler,
        rooms,
        heartbeats,
        directory,
        registry,
        settings: settings.clone(),
    })
}
