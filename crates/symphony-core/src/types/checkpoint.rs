//! Per-iteration checkpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Checkpoint payload emitted by an instrument through `checkpoint_fn`.
///
/// The task id is bound by the runtime when the callback is built, so
/// instruments only describe the iteration itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub iteration_num: u32,
    /// Phase label, e.g. hypothesis/experiment/analysis/reflection.
    pub phase: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u64,
}

impl CheckpointRecord {
    pub fn new(
        iteration_num: u32,
        phase: impl Into<String>,
        input: Value,
        output: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            iteration_num,
            phase: phase.into(),
            input,
            output,
            duration_ms,
        }
    }

    /// Stamp the record with its owning task for persistence.
    pub fn into_checkpoint(self, task_id: impl Into<String>) -> IterationCheckpoint {
        IterationCheckpoint {
            task_id: task_id.into(),
            iteration_num: self.iteration_num,
            phase: self.phase,
            input: self.input,
            output: self.output,
            duration_ms: self.duration_ms,
            created_at: Utc::now(),
        }
    }
}

/// Persisted iteration checkpoint.
///
/// `iteration_num` strictly increases per task with no gaps; the
/// checkpoint store rejects out-of-order records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationCheckpoint {
    pub task_id: String,
    pub iteration_num: u32,
    pub phase: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}
