//! Task request, context, plan and response types.
//!
//! `TaskContext` is the runtime envelope distinct from `TaskRequest`: it
//! carries the caller-supplied context plus runtime-only callbacks
//! (`checkpoint_fn`, `spawn_fn`), the cancellation token and the
//! recursion counters. Callbacks are never serialized.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SpawnError;
use crate::instrument::InstrumentConfig;

use super::checkpoint::CheckpointRecord;
use super::finding::{ExecutionMetadata, Finding, InstrumentResult};
use super::outcome::{Outcome, ProcessType, TaskStatus};

/// Default spawn depth budget when neither the context nor the
/// preferences override it.
pub const DEFAULT_MAX_DEPTH: u32 = 3;

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_true() -> bool {
    true
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Persists an `IterationCheckpoint` and emits an `iteration` event.
pub type CheckpointFn = Arc<dyn Fn(CheckpointRecord) -> BoxFuture<'static, ()> + Send + Sync>;

/// Re-enters the conductor with a sub-query at incremented depth.
pub type SpawnFn = Arc<
    dyn Fn(String, Option<TaskContext>) -> BoxFuture<'static, Result<InstrumentResult, SpawnError>>
        + Send
        + Sync,
>;

/// Classified intent attached to a task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub success_criteria: Option<String>,
    #[serde(default = "Intent::default_confidence")]
    pub confidence: f64,
    /// Whether the intent was inferred rather than stated by the caller.
    #[serde(default)]
    pub inferred: bool,
}

impl Intent {
    fn default_confidence() -> f64 {
        0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Decision,
    Research,
    Action,
    Curiosity,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    #[default]
    Soon,
    Planning,
    Exploratory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thoroughness {
    Quick,
    #[default]
    Balanced,
    Thorough,
}

/// Caller preferences for task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPreferences {
    #[serde(default)]
    pub thoroughness: Thoroughness,
    /// 0 = plan-approval, 1 = auto-execute full visibility,
    /// 2 = auto-execute minimal surface. Falls back to the stored trust
    /// level for the authenticated caller when absent.
    #[serde(default)]
    pub trust_level: Option<u8>,
    #[serde(default = "default_true")]
    pub notify_on_complete: bool,
    #[serde(default)]
    pub max_spawn_depth: Option<u32>,
}

impl Default for TaskPreferences {
    fn default() -> Self {
        Self {
            thoroughness: Thoroughness::Balanced,
            trust_level: None,
            notify_on_complete: true,
            max_spawn_depth: None,
        }
    }
}

/// Runtime envelope travelling with a task through instruments and
/// compositions.
#[derive(Clone, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_summary: Option<String>,
    /// Image refs: data URLs or fetchable https URLs.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    /// Upstream results for synthesis-style instruments.
    #[serde(default)]
    pub input_results: Option<Vec<InstrumentResult>>,
    #[serde(skip)]
    pub checkpoint_fn: Option<CheckpointFn>,
    #[serde(skip)]
    pub spawn_fn: Option<SpawnFn>,
    /// Cooperative cancellation; clones share the token.
    #[serde(skip)]
    pub cancellation: CancellationToken,
    /// Per-step overrides applied by compositions; never visible to
    /// sibling steps because each step gets its own context clone.
    #[serde(skip)]
    pub config_override: Option<InstrumentConfig>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self {
            app_id: None,
            user_id: None,
            conversation_summary: None,
            attachments: Vec::new(),
            location: None,
            goal: None,
            input_results: None,
            checkpoint_fn: None,
            spawn_fn: None,
            cancellation: CancellationToken::new(),
            config_override: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("app_id", &self.app_id)
            .field("user_id", &self.user_id)
            .field("attachments", &self.attachments.len())
            .field("input_results", &self.input_results.as_ref().map(Vec::len))
            .field("has_checkpoint_fn", &self.checkpoint_fn.is_some())
            .field("has_spawn_fn", &self.spawn_fn.is_some())
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Indicators that an attachment is an image ref.
const IMAGE_INDICATORS: [&str; 6] = [
    "data:image/",
    ".jpg",
    ".jpeg",
    ".png",
    ".gif",
    ".webp",
];

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Emit a checkpoint if the runtime injected a callback.
    pub async fn emit_checkpoint(&self, record: CheckpointRecord) {
        if let Some(checkpoint) = &self.checkpoint_fn {
            checkpoint(record).await;
        }
    }

    /// Spawn a bounded sub-task through the conductor.
    pub async fn spawn(
        &self,
        sub_query: impl Into<String>,
        sub_context: Option<TaskContext>,
    ) -> Result<InstrumentResult, SpawnError> {
        match &self.spawn_fn {
            Some(spawn) => spawn(sub_query.into(), sub_context).await,
            None => Err(SpawnError::Failed(
                "spawn is not available in this context".to_string(),
            )),
        }
    }

    /// Clone the context for a composition step, replacing the upstream
    /// results and clearing any per-step override.
    pub fn for_step(&self, input_results: Option<Vec<InstrumentResult>>) -> TaskContext {
        let mut context = self.clone();
        context.input_results = input_results;
        context.config_override = None;
        context
    }

    /// Whether any attachment looks like an image ref.
    pub fn has_image_attachment(&self) -> bool {
        self.attachments.iter().any(|att| {
            let lower = att.to_ascii_lowercase();
            let without_query = lower.split('?').next().unwrap_or("");
            IMAGE_INDICATORS
                .iter()
                .any(|indicator| without_query.contains(indicator))
                || lower.starts_with("https://")
        })
    }
}

/// The unit of work submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default = "new_request_id")]
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub context: Option<TaskContext>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub preferences: Option<TaskPreferences>,
}

impl TaskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: new_request_id(),
            query: query.into(),
            context: None,
            intent: None,
            preferences: None,
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_preferences(mut self, preferences: TaskPreferences) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}

/// Execution plan held for approval when the trust gate is at level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub task_id: String,
    pub query: String,
    pub instrument: String,
    pub process_type: ProcessType,
    pub estimated_iterations: u32,
    pub description: String,
    #[serde(default = "default_true")]
    pub requires_approval: bool,
}

/// Immediate response after task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(default)]
    pub plan: Option<TaskPlan>,
}

/// Poll response while a task has not terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPendingResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Full terminal response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub request_id: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub summary: String,
    pub confidence: f64,
    pub metadata: ExecutionMetadata,
    #[serde(default)]
    pub discrepancy: Option<String>,
    #[serde(default)]
    pub suggested_followups: Vec<String>,
}

impl TaskResponse {
    /// Collapse into the shape embedded by spawn results and cross-room
    /// merges.
    pub fn into_instrument_result(self) -> InstrumentResult {
        InstrumentResult {
            outcome: self.outcome,
            findings: self.findings,
            summary: self.summary,
            confidence: self.confidence,
            iterations: self.metadata.iterations,
            sources_consulted: self.metadata.sources_consulted,
            discrepancy: self.discrepancy,
            suggested_followups: self.suggested_followups,
        }
    }

    /// Reduced surface returned to trust-level-2 callers by default.
    pub fn minimal(&self) -> TaskMinimalResponse {
        TaskMinimalResponse {
            request_id: self.request_id.clone(),
            outcome: self.outcome,
            summary: self.summary.clone(),
            confidence: self.confidence,
        }
    }
}

/// Summary + outcome only; findings and metadata elided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMinimalResponse {
    pub request_id: String,
    pub outcome: Outcome,
    pub summary: String,
    pub confidence: f64,
}

/// Persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub request: TaskRequest,
    pub status: TaskStatus,
    #[serde(default)]
    pub response: Option<TaskResponse>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a fresh record in the given initial status.
    pub fn new(request: TaskRequest, status: TaskStatus) -> Self {
        let now = Utc::now();
        let (app_id, user_id) = match &request.context {
            Some(context) => (context.app_id.clone(), context.user_id.clone()),
            None => (None, None),
        };
        Self {
            id: request.id.clone(),
            app_id,
            user_id,
            request,
            status,
            response: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_attachment_detection() {
        let mut context = TaskContext::default();
        assert!(!context.has_image_attachment());

        context.attachments = vec!["report.pdf".to_string()];
        assert!(!context.has_image_attachment());

        context.attachments = vec!["photo.JPG?size=large".to_string()];
        assert!(context.has_image_attachment());

        context.attachments = vec!["data:image/png;base64,iVBOR".to_string()];
        assert!(context.has_image_attachment());

        context.attachments = vec!["https://cdn.example.com/shot".to_string()];
        assert!(context.has_image_attachment());
    }

    #[test]
    fn test_context_callbacks_survive_clone_but_not_serde() {
        let mut context = TaskContext::default();
        context.checkpoint_fn = Some(Arc::new(|_record| Box::pin(async {})));

        let cloned = context.clone();
        assert!(cloned.checkpoint_fn.is_some());

        let json = serde_json::to_string(&context).unwrap();
        let parsed: TaskContext = serde_json::from_str(&json).unwrap();
        assert!(parsed.checkpoint_fn.is_none());
        assert_eq!(parsed.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_cancellation_is_shared_across_clones() {
        let context = TaskContext::default();
        let step = context.for_step(None);
        context.cancellation.cancel();
        assert!(step.is_cancelled());
    }

    #[test]
    fn test_record_terminal_stamp() {
        let mut record = TaskRecord::new(TaskRequest::new("q"), TaskStatus::Pending);
        assert!(record.completed_at.is_none());
        record.set_status(TaskStatus::Complete);
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_request_defaults_fill_on_deserialize() {
        let request: TaskRequest = serde_json::from_str(r#"{"query":"hello"}"#).unwrap();
        assert!(!request.id.is_empty());
        assert!(request.context.is_none());
        assert!(request.preferences.is_none());
    }
}
