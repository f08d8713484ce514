//! Store traits and app-scoped isolation.
//!
//! Persistence is an external collaborator behind these narrow
//! contracts; implementations live in the stores crate. Every read or
//! write touching app-scoped tables goes through `AppScope`, the helper
//! that enforces row-level isolation at the database-client boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    Heartbeat, HeartbeatRun, IterationCheckpoint, SavedArrangement, TaskRecord, TaskResponse,
    TaskStatus,
};

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    /// Raised on illegal transitions, e.g. leaving a terminal status.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Tenant scope attached to every app-scoped query.
///
/// A row stamped with an app id is only visible to queries carrying the
/// same scope; rows with no app id are only visible to unauthenticated
/// queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppScope {
    app_id: String,
    #[serde(default)]
    user_id: Option<String>,
}

impl AppScope {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Row-level predicate: does this scope permit a row with the given
    /// app id?
    pub fn permits(scope: Option<&AppScope>, row_app_id: Option<&str>) -> bool {
        match (scope, row_app_id) {
            (Some(scope), Some(app_id)) => scope.app_id == app_id,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Task record persistence.
///
/// Implementations enforce the terminal-once invariant: any transition
/// out of a terminal status is a `Conflict`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Unscoped lookup for runtime internals (workers own their tasks).
    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Scoped lookup for the API surface.
    async fn get_scoped(
        &self,
        task_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError>;

    async fn complete(&self, task_id: &str, response: &TaskResponse) -> Result<(), StoreError>;

    async fn fail(&self, task_id: &str, error: &str) -> Result<(), StoreError>;

    async fn cancel(&self, task_id: &str) -> Result<(), StoreError>;

    async fn list_recent(
        &self,
        scope: Option<&AppScope>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn list_active(&self, scope: Option<&AppScope>) -> Result<Vec<TaskRecord>, StoreError>;
}

/// Iteration checkpoint persistence; rejects non-monotonic iterations.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn record(&self, checkpoint: &IterationCheckpoint) -> Result<(), StoreError>;

    /// Checkpoints for a task, ordered by iteration number.
    async fn list(&self, task_id: &str) -> Result<Vec<IterationCheckpoint>, StoreError>;
}

/// Heartbeat and heartbeat-run persistence.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn upsert(&self, heartbeat: &Heartbeat) -> Result<(), StoreError>;

    async fn get(
        &self,
        heartbeat_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<Heartbeat>, StoreError>;

    async fn delete(
        &self,
        heartbeat_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<bool, StoreError>;

    async fn list(&self, scope: Option<&AppScope>) -> Result<Vec<Heartbeat>, StoreError>;

    /// Every active heartbeat across apps; scheduler use only.
    async fn list_active(&self) -> Result<Vec<Heartbeat>, StoreError>;

    async fn create_run(&self, run: &HeartbeatRun) -> Result<(), StoreError>;

    async fn update_run(&self, run: &HeartbeatRun) -> Result<(), StoreError>;

    /// Duplicate-fire lookup for one cron minute.
    async fn find_run_for_minute(
        &self,
        heartbeat_id: &str,
        fire_minute: &str,
    ) -> Result<Option<HeartbeatRun>, StoreError>;

    async fn list_runs(
        &self,
        heartbeat_id: &str,
        limit: usize,
    ) -> Result<Vec<HeartbeatRun>, StoreError>;
}

/// Saved arrangement persistence.
#[async_trait]
pub trait ArrangementStore: Send + Sync {
    async fn save(&self, arrangement: &SavedArrangement) -> Result<(), StoreError>;

    async fn get(
        &self,
        arrangement_id: &str,
        scope: Option<&AppScope>,
    ) -> Result<Option<SavedArrangement>, StoreError>;

    async fn list(&self, scope: Option<&AppScope>) -> Result<Vec<SavedArrangement>, StoreError>;
}

/// A registered client application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-app external user identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub app_id: String,
    pub external_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// App and user identity directory backing auth.
#[async_trait]
pub trait AppDirectory: Send + Sync {
    async fn register_app(&self, name: &str, api_key: &str) -> Result<AppRecord, StoreError>;

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<AppRecord>, StoreError>;

    async fn set_active(&self, app_id: &str, active: bool) -> Result<(), StoreError>;

    /// Create-on-first-use lookup keyed by (app_id, external_user_id).
    async fn ensure_user(
        &self,
        app_id: &str,
        external_user_id: &str,
    ) -> Result<UserProfile, StoreError>;

    /// Liveness probe for the health surface.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_predicate() {
        let scope = AppScope::new("app-a");
        assert!(AppScope::permits(Some(&scope), Some("app-a")));
        assert!(!AppScope::permits(Some(&scope), Some("app-b")));
        assert!(!AppScope::permits(Some(&scope), None));
        assert!(AppScope::permits(None, None));
        assert!(!AppScope::permits(None, Some("app-a")));
    }
}
