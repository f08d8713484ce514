//! # Symphony Server
//!
//! The HTTP/SSE surface: a thin translation of the runtime's
//! operations onto axum routes, plus process bootstrap (tool registry,
//! instruments, conductor, service, scheduler, background loops).

mod auth;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{delete, get, post, put};
use axum::Router;

use symphony_config::Settings;

pub use auth::AuthContext;
pub use error::ApiError;
pub use state::{build_state, AppState};

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Tasks
        .route("/task", post(routes::tasks::submit_task))
        .route("/task/{id}", get(routes::tasks::get_task))
        .route("/task/{id}/approve", post(routes::tasks::approve_task))
        .route("/task/{id}/cancel", post(routes::tasks::cancel_task))
        .route("/task/{id}/checkpoints", get(routes::tasks::get_checkpoints))
        .route("/task/{id}/stream", get(routes::stream::stream_task))
        .route("/tasks/active", get(routes::tasks::active_tasks))
        .route("/tasks/recent", get(routes::tasks::recent_tasks))
        .route("/tasks/stats", get(routes::tasks::task_stats))
        // Trust
        .route("/trust/metrics", get(routes::trust::get_metrics))
        .route("/trust/suggestion", get(routes::trust::get_suggestion))
        .route("/trust/level", put(routes::trust::put_level))
        // Heartbeats
        .route("/heartbeats", post(routes::heartbeats::create_heartbeat))
        .route("/heartbeats", get(routes::heartbeats::list_heartbeats))
        .route("/heartbeats/tick", post(routes::heartbeats::force_tick))
        .route("/heartbeats/{id}", get(routes::heartbeats::get_heartbeat))
        .route("/heartbeats/{id}", put(routes::heartbeats::update_heartbeat))
        .route(
            "/heartbeats/{id}",
            delete(routes::heartbeats::delete_heartbeat),
        )
        .route("/heartbeats/{id}/runs", get(routes::heartbeats::list_runs))
        // Rooms
        .route("/rooms/register", post(routes::rooms::register_room))
        .route("/rooms/heartbeat", post(routes::rooms::room_heartbeat))
        .route("/rooms/deregister", post(routes::rooms::deregister_room))
        .route("/rooms", get(routes::rooms::list_rooms))
        .route("/rooms/status", get(routes::rooms::rooms_status))
        .route("/rooms/{id}", get(routes::rooms::get_room))
        // Health
        .route("/health", get(routes::health::health))
        .route("/health/system", get(routes::health::health_system))
        .route("/health/database", get(routes::health::health_database))
        .with_state(state)
}

/// Bootstrap and serve until shutdown.
pub async fn run_server(settings: Settings, listen: SocketAddr) -> anyhow::Result<()> {
    let state = build_state(&settings)?;

    if settings.autonomic_enabled {
        state.scheduler.spawn();
        spawn_health_loop(&state, Duration::from_secs(settings.autonomic_health_interval));
        tracing::info!("autonomic loops enabled");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    tracing::info!(%listen, "symphony-server listening");
    axum::serve(listener, app)
        .await
        .context("server terminated with error")
}

/// Periodic housekeeping: stale rooms, expired event topics, old
/// managed tasks, tool health.
fn spawn_health_loop(state: &AppState, interval: Duration) {
    let state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            tick.tick().await;
            let offline = state.rooms.sweep_offline();
            let expired = state.service.event_bus().cleanup_stale();
            let cleaned = state.service.manager().cleanup_old(3600);
            for (tool, status) in state.registry.health_check_all().await {
                if let Err(err) = status {
                    tracing::warn!(tool = %tool, error = %err, "tool health check failed");
                    state
                        .service
                        .errors()
                        .record(tool, "health", err.to_string(), None);
                }
            }
            tracing::debug!(offline, expired, cleaned, "health sweep complete");
        }
    });
}
