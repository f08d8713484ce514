//! Cron-scheduled recurring task templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// A recurring task template materialized by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    /// Query with `{date}`, `{time}`, `{weekday}`, `{user_name}`,
    /// `{heartbeat_name}` placeholders.
    pub query_template: String,
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Serialized `TaskContext` fields merged into each materialized run.
    #[serde(default)]
    pub context_template: Option<Value>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of one materialized heartbeat firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One firing of a heartbeat.
///
/// `fire_minute` identifies the cron minute that produced the run and is
/// the duplicate-fire suppression key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRun {
    pub id: String,
    pub heartbeat_id: String,
    pub status: HeartbeatRunStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    pub fire_minute: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HeartbeatRun {
    pub fn new(heartbeat_id: impl Into<String>, fire_minute: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            heartbeat_id: heartbeat_id.into(),
            status: HeartbeatRunStatus::Pending,
            task_id: None,
            fire_minute: fire_minute.into(),
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
            error: None,
        }
    }
}
