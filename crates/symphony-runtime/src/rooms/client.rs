//! HTTP client for delegating sub-tasks to remote rooms.
//!
//! POSTs the sub-request to the room's `/task` endpoint, polls until
//! terminal when the room answers asynchronously, and normalizes the
//! response into an `InstrumentResult`. All failure modes raise
//! `DelegationError`, which the conductor converts into a failover
//! event and local execution.

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use symphony_core::types::{InstrumentResult, Outcome, Room, TaskRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Remote room failure, recovered locally by the conductor.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("room timed out after {0} ms")]
    Timeout(u64),

    #[error("room returned http {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("room unreachable: {0}")]
    Unreachable(String),

    #[error("remote execution failed: {0}")]
    Remote(String),

    #[error("invalid room response: {0}")]
    Invalid(String),
}

/// HTTP delegation client.
pub struct RoomClient {
    http: reqwest::Client,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for RoomClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl RoomClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Delegate a task to a room and wait for its terminal result.
    pub async fn delegate(
        &self,
        room: &Room,
        request: &TaskRequest,
    ) -> Result<InstrumentResult, DelegationError> {
        let started = Instant::now();
        tracing::info!(
            room_id = %room.room_id,
            task_id = %request.id,
            "delegating task to room"
        );

        // Runtime callbacks are serde-skipped, so the wire request is
        // just the data envelope.
        let body = self
            .http
            .post(format!("{}/task", room.url.trim_end_matches('/')))
            .json(request)
            .send()
            .await
            .map_err(|err| self.map_send_error(err, started))?;

        let status = body.status();
        if !status.is_success() {
            let detail = body.text().await.unwrap_or_default();
            return Err(DelegationError::Http {
                status: status.as_u16(),
                detail: preview(&detail),
            });
        }

        let value: Value = body
            .json()
            .await
            .map_err(|err| DelegationError::Invalid(err.to_string()))?;

        // Synchronous rooms answer with the result inline; asynchronous
        // rooms answer with a task id to poll.
        if let Some(result) = normalize_result(&value) {
            return Ok(result);
        }
        let task_id = value
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| DelegationError::Invalid("response has neither result nor task_id".to_string()))?
            .to_string();

        self.poll_until_terminal(room, &task_id, started).await
    }

    async fn poll_until_terminal(
        &self,
        room: &Room,
        task_id: &str,
        started: Instant,
    ) -> Result<InstrumentResult, DelegationError> {
        loop {
            if started.elapsed() >= self.timeout {
                return Err(DelegationError::Timeout(started.elapsed().as_millis() as u64));
            }
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(format!(
                    "{}/task/{}",
                    room.url.trim_end_matches('/'),
                    task_id
                ))
                .send()
                .await
                .map_err(|err| self.map_send_error(err, started))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(DelegationError::Http {
                    status: status.as_u16(),
                    detail: preview(&detail),
                });
            }

            let value: Value = response
                .json()
                .await
                .map_err(|err| DelegationError::Invalid(err.to_string()))?;

            match value.get("status").and_then(Value::as_str) {
                Some("failed") => {
                    let error = value
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(DelegationError::Remote(error.to_string()));
                }
                Some("cancelled") => {
                    return Err(DelegationError::Remote("remote task cancelled".to_string()));
                }
                Some(status) if !is_terminal_status(status) => continue,
                _ => {}
            }

            if let Some(result) = normalize_result(&value) {
                return Ok(result);
            }
        }
    }

    /// Best-effort cancellation propagation to a delegated sub-task.
    pub async fn cancel(&self, room: &Room, task_id: &str) {
        let url = format!(
            "{}/task/{}/cancel",
            room.url.trim_end_matches('/'),
            task_id
        );
        if let Err(err) = self.http.post(url).send().await {
            tracing::debug!(
                room_id = %room.room_id,
                task_id = %task_id,
                error = %err,
                "cancel propagation failed"
            );
        }
    }

    fn map_send_error(&self, err: reqwest::Error, started: Instant) -> DelegationError {
        if err.is_timeout() {
            DelegationError::Timeout(started.elapsed().as_millis() as u64)
        } else if err.is_connect() {
            DelegationError::Unreachable(err.to_string())
        } else {
            DelegationError::Http {
                status: 0,
                detail: err.to_string(),
            }
        }
    }
}

fn is_terminal_status(status: &str) -> bool {
    matches!(status, "complete" | "failed" | "cancelled")
}

/// Normalize a room response into an `InstrumentResult`.
///
/// Accepts a bare `InstrumentResult`, a `TaskResponse`-shaped object,
/// or an envelope with a nested `response` field.
fn normalize_result(value: &Value) -> Option<InstrumentResult> {
    if let Ok(result) = serde_json::from_value::<InstrumentResult>(value.clone()) {
        return Some(result);
    }
    if let Some(nested) = value.get("response") {
        if !nested.is_null() {
            return normalize_result(nested);
        }
    }
    // Looser shape: summary + optional outcome label.
    let summary = value.get("summary").and_then(Value::as_str)?;
    let outcome = match value.get("outcome").and_then(Value::as_str) {
        Some("complete") => Outcome::Complete,
        Some("saturated") => Outcome::Saturated,
        Some("inconclusive") => Outcome::Inconclusive,
        _ => Outcome::Bounded,
    };
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    Some(InstrumentResult::new(outcome, summary, confidence))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_accepts_full_instrument_result() {
        let value = json!({
            "outcome": "complete",
            "findings": [],
            "summary": "done",
            "confidence": 0.9,
            "iterations": 2,
            "sources_consulted": ["https://a.example"],
        });
        let result = normalize_result(&value).unwrap();
        assert_eq!(result.outcome, Outcome::Complete);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn test_normalize_unwraps_task_response_envelope() {
        let value = json!({
            "task_id": "t1",
            "status": "complete",
            "response": {
                "outcome": "saturated",
                "summary": "merged",
                "confidence": 0.7,
            }
        });
        let result = normalize_result(&value).unwrap();
        assert_eq!(result.outcome, Outcome::Saturated);
        assert_eq!(result.summary, "merged");
    }

    #[test]
    fn test_normalize_rejects_resultless_payloads() {
        assert!(normalize_result(&json!({"task_id": "t1", "status": "pending"})).is_none());
    }
}
