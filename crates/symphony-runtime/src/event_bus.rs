//! In-memory per-task event pub/sub.
//!
//! Each task gets its own topic with bounded history; late subscribers
//! receive the full history before live events. The terminal event
//! (`complete`/`error`/`cancelled`) is emitted at most once, is always
//! the last event on its topic, and is never dropped by overflow.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use symphony_core::types::{CheckpointRecord, Outcome};

pub const DEFAULT_HISTORY_LIMIT: usize = 1024;
pub const DEFAULT_HISTORY_TTL: Duration = Duration::from_secs(15 * 60);
const SUBSCRIBER_BUFFER_MARGIN: usize = 64;

/// Event shapes streamed per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: String,
        ts: DateTime<Utc>,
    },
    Iteration {
        task_id: String,
        iteration_num: u32,
        phase: String,
        duration_ms: u64,
        data: Value,
        ts: DateTime<Utc>,
    },
    Complete {
        task_id: String,
        outcome: Outcome,
        summary: String,
        confidence: f64,
        ts: DateTime<Utc>,
    },
    Error {
        task_id: String,
        error: String,
        ts: DateTime<Utc>,
    },
    Cancelled {
        task_id: String,
        ts: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn started(task_id: impl Into<String>) -> Self {
        Self::Started {
            task_id: task_id.into(),
            ts: Utc::now(),
        }
    }

    pub fn iteration(task_id: impl Into<String>, record: &CheckpointRecord) -> Self {
        Self::Iteration {
            task_id: task_id.into(),
            iteration_num: record.iteration_num,
            phase: record.phase.clone(),
            duration_ms: record.duration_ms,
            data: record.output.clone(),
            ts: Utc::now(),
        }
    }

    pub fn complete(
        task_id: impl Into<String>,
        outcome: Outcome,
        summary: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::Complete {
            task_id: task_id.into(),
            outcome,
            summary: summary.into(),
            confidence,
            ts: Utc::now(),
        }
    }

    pub fn error(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            task_id: task_id.into(),
            error: error.into(),
            ts: Utc::now(),
        }
    }

    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self::Cancelled {
            task_id: task_id.into(),
            ts: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id, .. }
            | Self::Iteration { task_id, .. }
            | Self::Complete { task_id, .. }
            | Self::Error { task_id, .. }
            | Self::Cancelled { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Iteration { .. } => "iteration",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

struct Topic {
    history: VecDeque<TaskEvent>,
    subscribers: Vec<mpsc::Sender<TaskEvent>>,
    terminal: bool,
    completed_at: Option<Instant>,
}

impl Topic {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            subscribers: Vec::new(),
            terminal: false,
            completed_at: None,
        }
    }
}

/// Per-task in-memory pub/sub with bounded history.
pub struct EventBus {
    topics: Mutex<HashMap<String, Topic>>,
    history_limit: usize,
    history_ttl: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_HISTORY_LIMIT, DEFAULT_HISTORY_TTL)
    }

    pub fn with_limits(history_limit: usize, history_ttl: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            history_limit: history_limit.max(1),
            history_ttl,
        }
    }

    /// Emit an event; returns false when the topic is already terminal
    /// and the event was dropped.
    pub fn emit(&self, event: TaskEvent) -> bool {
        let mut topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(poisoned) => poisoned.into_inner(),
        };
        let topic = topics
            .entry(event.task_id().to_string())
            .or_insert_with(Topic::new);

        if topic.terminal {
            tracing::warn!(
                task_id = %event.task_id(),
                event_type = event.event_type(),
                "dropping emit on terminal topic"
            );
            return false;
        }

        topic.history.push_back(event.clone());
        // Overflow drops the oldest events; the terminal event is always
        // the newest so it can never be the one dropped.
        while topic.history.len() > self.history_limit {
            topic.history.pop_front();
        }

        if event.is_terminal() {
            topic.terminal = true;
            topic.completed_at = Some(Instant::now());
        }

        topic.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(pending)) => {
                if pending.is_terminal() {
                    // Never lose the terminal event: hand it to a detached
                    // send that completes once the subscriber drains.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        let tx = tx.clone();
                        handle.spawn(async move {
                            let _ = tx.send(pending).await;
                        });
                    }
                    true
                } else {
                    // Slow subscriber: drop the event for this queue only.
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        true
    }

    /// Subscribe to a task's events; the stream starts with the full
    /// history so late joiners see everything.
    pub fn subscribe(&self, task_id: &str) -> mpsc::Receiver<TaskEvent> {
        let (tx, rx) = mpsc::channel(self.history_limit + SUBSCRIBER_BUFFER_MARGIN);
        let mut topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(poisoned) => poisoned.into_inner(),
        };
        let topic = topics.entry(task_id.to_string()).or_insert_with(Topic::new);

        for event in &topic.history {
            // Buffer exceeds the history bound, so replay cannot overflow.
            let _ = tx.try_send(event.clone());
        }

        if !topic.terminal {
            topic.subscribers.push(tx);
        }
        rx
    }

    pub fn has_terminal_event(&self, task_id: &str) -> bool {
        let topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics.get(task_id).map(|t| t.terminal).unwrap_or(false)
    }

    /// Snapshot of a task's event history.
    pub fn history(&self, task_id: &str) -> Vec<TaskEvent> {
        let topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics
            .get(task_id)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop topics whose terminal event is past the history TTL.
    pub fn cleanup_stale(&self) -> usize {
        let mut topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = topics.len();
        topics.retain(|_, topic| match topic.completed_at {
            Some(completed_at) => completed_at.elapsed() <= self.history_ttl,
            None => true,
        });
        before - topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_joiner_receives_history_then_live() {
        tokio_test::block_on(async {
            let bus = EventBus::new();
            bus.emit(TaskEvent::started("t1"));
            bus.emit(TaskEvent::iteration(
                "t1",
                &CheckpointRecord::new(1, "reflection", Value::Null, Value::Null, 3),
            ));

            let mut rx = bus.subscribe("t1");
            bus.emit(TaskEvent::complete("t1", Outcome::Complete, "done", 0.9));

            assert_eq!(rx.recv().await.unwrap().event_type(), "started");
            assert_eq!(rx.recv().await.unwrap().event_type(), "iteration");
            let last = rx.recv().await.unwrap();
            assert_eq!(last.event_type(), "complete");
            assert!(last.is_terminal());
        });
    }

    #[test]
    fn test_terminal_event_is_emitted_at_most_once() {
        tokio_test::block_on(async {
            let bus = EventBus::new();
            bus.emit(TaskEvent::started("t1"));
            assert!(bus.emit(TaskEvent::complete("t1", Outcome::Complete, "done", 0.9)));

            // Further emits on the terminal topic are dropped.
            assert!(!bus.emit(TaskEvent::error("t1", "late error")));
            assert!(!bus.emit(TaskEvent::started("t1")));

            let history = bus.history("t1");
            assert_eq!(history.len(), 2);
            assert!(history.last().unwrap().is_terminal());
        });
    }

    #[test]
    fn test_overflow_drops_oldest_but_keeps_terminal() {
        tokio_test::block_on(async {
            let bus = EventBus::with_limits(3, DEFAULT_HISTORY_TTL);
            bus.emit(TaskEvent::started("t1"));
            for i in 1..=4u32 {
                bus.emit(TaskEvent::iteration(
                    "t1",
                    &CheckpointRecord::new(i, "reflection", Value::Null, Value::Null, 1),
                ));
            }
            bus.emit(TaskEvent::complete("t1", Outcome::Saturated, "done", 0.8));

            let history = bus.history("t1");
            assert_eq!(history.len(), 3);
            assert!(history.last().unwrap().is_terminal());
            // The oldest events (started, iterations 1-2) were dropped.
            assert_eq!(history[0].event_type(), "iteration");
        });
    }

    #[test]
    fn test_subscriber_after_terminal_gets_history_only() {
        tokio_test::block_on(async {
            let bus = EventBus::new();
            bus.emit(TaskEvent::started("t1"));
            bus.emit(TaskEvent::cancelled("t1"));

            let mut rx = bus.subscribe("t1");
            assert_eq!(rx.recv().await.unwrap().event_type(), "started");
            assert_eq!(rx.recv().await.unwrap().event_type(), "cancelled");
            // Channel closes because the topic took no live sender.
            assert!(rx.recv().await.is_none());
        });
    }

    #[test]
    fn test_cleanup_only_removes_terminal_topics() {
        tokio_test::block_on(async {
            let bus = EventBus::with_limits(16, Duration::from_secs(0));
            bus.emit(TaskEvent::started("live"));
            bus.emit(TaskEvent::started("done"));
            bus.emit(TaskEvent::complete("done", Outcome::Complete, "x", 1.0));

            std::thread::sleep(Duration::from_millis(5));
            assert_eq!(bus.cleanup_stale(), 1);
            assert!(!bus.history("live").is_empty());
            assert!(bus.history("done").is_empty());
        });
    }
}
