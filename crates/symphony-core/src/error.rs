//! Core error kinds shared across the workspace.

use thiserror::Error;

/// A required capability could not be resolved to a usable tool.
///
/// Fatal at instrument construction; no task runs against an instrument
/// whose required capability set is unsatisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("no registered tool provides required capability '{0}'")]
    Unsatisfied(String),

    #[error("capability '{0}' is bound to a tool of the wrong kind")]
    WrongKind(String),
}

/// Failures raised by the conductor's spawn callback.
#[derive(Debug, Clone, Error)]
pub enum SpawnError {
    /// Spawning would exceed the context's depth budget.
    #[error("spawn depth exceeded: attempted depth={attempted}, max={max}")]
    DepthExceeded { attempted: u32, max: u32 },

    #[error("sub-task cancelled")]
    Cancelled,

    #[error("sub-task failed: {0}")]
    Failed(String),
}

/// Errors surfaced by instrument execution.
///
/// Tool failures inside an iteration are recovered into low-confidence
/// findings and do not reach this type; whole-loop failures collapse to
/// an `Outcome` instead.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("instrument error: {0}")]
    Internal(String),
}
