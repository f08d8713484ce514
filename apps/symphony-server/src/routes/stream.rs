//! Server-Sent Events stream for a task's event topic.
//!
//! Late joiners receive the full history replay before live events;
//! the terminal event closes the stream. A no-op keepalive goes out
//! every 30 seconds.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn stream_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<String>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // Scoped existence check before subscribing.
    state
        .service
        .tasks()
        .get_scoped(&task_id, auth.scope.as_ref())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", task_id)))?;

    let mut rx = state.service.event_bus().subscribe(&task_id);

    let event_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            yield Ok(SseEvent::default().event(event.event_type()).data(payload));
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}
