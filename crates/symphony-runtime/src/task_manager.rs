//! Background task lifecycle tracking.
//!
//! The task manager owns the in-flight view of every background worker:
//! what is running, how far along it is, and the cancellation signal a
//! worker cooperatively observes between iterations and at spawn
//! points. Lifecycle atomicity (exactly one terminal transition) is
//! enforced here for the in-memory view and by the task store for the
//! persisted record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

const QUERY_PREVIEW_CHARS: usize = 100;

/// State of a managed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedState {
    Queued,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl ManagedState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Cancelling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A task tracked by the manager.
#[derive(Debug, Clone)]
pub struct ManagedTask {
    pub task_id: String,
    pub query: String,
    pub instrument: Option<String>,
    pub state: ManagedState,
    pub cancellation: CancellationToken,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    pub current_iteration: u32,
    pub max_iterations: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ManagedTask {
    pub fn view(&self) -> ManagedTaskView {
        ManagedTaskView {
            task_id: self.task_id.clone(),
            query: self.query.clone(),
            instrument: self.instrument.clone(),
            state: self.state,
            app_id: self.app_id.clone(),
            user_id: self.user_id.clone(),
            current_iteration: self.current_iteration,
            max_iterations: self.max_iterations,
            started_at: self.started_at,
            created_at: self.created_at,
            running_seconds: self
                .started_at
                .map(|started| (Utc::now() - started).num_seconds().max(0)),
        }
    }
}

/// API-facing snapshot of a managed task.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedTaskView {
    pub task_id: String,
    pub query: String,
    pub instrument: Option<String>,
    pub state: ManagedState,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    pub current_iteration: u32,
    pub max_iterations: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub running_seconds: Option<i64>,
}

/// Tracks all in-flight background tasks behind one coarse mutex.
#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<HashMap<String, ManagedTask>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ManagedTask>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a task before its worker starts; returns the worker's
    /// cancellation token.
    pub fn register(
        &self,
        task_id: &str,
        query: &str,
        instrument: Option<String>,
        app_id: Option<String>,
        user_id: Option<String>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
        let managed = ManagedTask {
            task_id: task_id.to_string(),
            query: preview,
            instrument,
            state: ManagedState::Queued,
            cancellation: token.clone(),
            app_id,
            user_id,
            current_iteration: 0,
            max_iterations: None,
            started_at: None,
            created_at: Utc::now(),
        };
        self.lock().insert(task_id.to_string(), managed);
        tracing::debug!(task_id = %task_id, "registered task");
        token
    }

    pub fn mark_running(&self, task_id: &str, max_iterations: Option<u32>) {
        if let Some(task) = self.lock().get_mut(task_id) {
            task.state = ManagedState::Running;
            task.started_at = Some(Utc::now());
            task.max_iterations = max_iterations;
        }
    }

    pub fn update_progress(&self, task_id: &str, iteration: u32) {
        if let Some(task) = self.lock().get_mut(task_id) {
            task.current_iteration = iteration;
        }
    }

    fn terminal_transition(&self, task_id: &str, state: ManagedState) -> bool {
        let mut tasks = self.lock();
        match tasks.get_mut(task_id) {
            Some(task) if task.state.is_active() => {
                task.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn mark_completed(&self, task_id: &str) -> bool {
        self.terminal_transition(task_id, ManagedState::Completed)
    }

    pub fn mark_failed(&self, task_id: &str) -> bool {
        self.terminal_transition(task_id, ManagedState::Failed)
    }

    pub fn mark_cancelled(&self, task_id: &str) -> bool {
        self.terminal_transition(task_id, ManagedState::Cancelled)
    }

    /// Request cancellation of an active task; the worker observes the
    /// token at its next iteration boundary or spawn point.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.lock();
        match tasks.get_mut(task_id) {
            Some(task) if task.state.is_active() => {
                task.state = ManagedState::Cancelling;
                task.cancellation.cancel();
                tracing::info!(task_id = %task_id, "requested cancellation");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<ManagedTask> {
        self.lock().get(task_id).cloned()
    }

    pub fn get_active(&self, app_id: Option<&str>) -> Vec<ManagedTask> {
        let tasks = self.lock();
        let mut active: Vec<ManagedTask> = tasks
            .values()
            .filter(|task| task.state.is_active())
            .filter(|task| match app_id {
                Some(app_id) => task.app_id.as_deref() == Some(app_id),
                None => true,
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    pub fn get_recent(&self, app_id: Option<&str>, limit: usize) -> Vec<ManagedTask> {
        let tasks = self.lock();
        let mut recent: Vec<ManagedTask> = tasks
            .values()
            .filter(|task| match app_id {
                Some(app_id) => task.app_id.as_deref() == Some(app_id),
                None => true,
            })
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        recent
    }

    /// Counts by state plus totals.
    pub fn stats(&self) -> BTreeMap<String, usize> {
        let tasks = self.lock();
        let mut stats = BTreeMap::new();
        for task in tasks.values() {
            *stats.entry(task.state.as_str().to_string()).or_insert(0) += 1;
        }
        stats.insert("total".to_string(), tasks.len());
        stats.insert(
            "active".to_string(),
            tasks.values().filter(|t| t.state.is_active()).count(),
        );
        stats
    }

    /// Drop terminal tasks older than `max_age_seconds`.
    pub fn cleanup_old(&self, max_age_seconds: i64) -> usize {
        let mut tasks = self.lock();
        let now = Utc::now();
        let before = tasks.len();
        tasks.retain(|_, task| {
            task.state.is_active() || (now - task.created_at).num_seconds() <= max_age_seconds
        });
        before - tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_terminal_transition() {
        let manager = TaskManager::new();
        manager.register("t1", "query", None, None, None);
        manager.mark_running("t1", Some(5));

        assert!(manager.mark_completed("t1"));
        // A second terminal transition is refused.
        assert!(!manager.mark_failed("t1"));
        assert!(!manager.mark_cancelled("t1"));
        assert_eq!(manager.get("t1").unwrap().state, ManagedState::Completed);
    }

    #[test]
    fn test_cancel_sets_token_and_state() {
        let manager = TaskManager::new();
        let token = manager.register("t1", "query", None, None, None);
        manager.mark_running("t1", None);

        assert!(manager.cancel("t1"));
        assert!(token.is_cancelled());
        assert_eq!(manager.get("t1").unwrap().state, ManagedState::Cancelling);

        // Worker observes and finalizes.
        assert!(manager.mark_cancelled("t1"));
        assert!(!manager.cancel("t1"));
    }

    #[test]
    fn test_active_and_stats_views() {
        let manager = TaskManager::new();
        manager.register("t1", "q", None, Some("app-a".to_string()), None);
        manager.register("t2", "q", None, Some("app-b".to_string()), None);
        manager.mark_running("t1", None);
        manager.mark_running("t2", None);
        manager.mark_completed("t2");

        assert_eq!(manager.get_active(None).len(), 1);
        assert_eq!(manager.get_active(Some("app-b")).len(), 0);

        let stats = manager.stats();
        assert_eq!(stats.get("running"), Some(&1));
        assert_eq!(stats.get("completed"), Some(&1));
        assert_eq!(stats.get("total"), Some(&2));
    }

    #[test]
    fn test_query_preview_truncation() {
        let manager = TaskManager::new();
        let long_query = "x".repeat(500);
        manager.register("t1", &long_query, None, None, None);
        assert_eq!(manager.get("t1").unwrap().query.len(), QUERY_PREVIEW_CHARS);
    }
}
