//! Outcome, task status and process visibility classifications.

use serde::{Deserialize, Serialize};

/// Terminal classification of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Confidence reached the threshold; the answer is considered final.
    Complete,
    /// Iterations stopped producing new signal.
    Saturated,
    /// The iteration budget ran out first.
    Bounded,
    /// An unresolved contradiction prevents a usable answer.
    Inconclusive,
}

impl Outcome {
    /// Whether this outcome counts as a success for trust accounting.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Complete | Outcome::Saturated)
    }

    /// Wire label for the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Complete => "complete",
            Outcome::Saturated => "saturated",
            Outcome::Bounded => "bounded",
            Outcome::Inconclusive => "inconclusive",
        }
    }
}

/// Persisted task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    AwaitingApproval,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// A terminal status is reached at most once and never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Observability tag for how visible an execution is to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// Invisible background processing.
    Autonomic,
    /// Summarized progress.
    SemiAutonomic,
    /// Fully streamed.
    Conscious,
}
