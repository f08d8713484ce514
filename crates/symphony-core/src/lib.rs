//! # Symphony Core
//!
//! Core abstractions and deterministic logic for the Loop Symphony
//! orchestration server.
//!
//! This crate contains:
//! - Task / Finding / Outcome / Trust / Heartbeat / Room definitions
//! - The Instrument trait and per-step configuration
//! - Tool traits, capability negotiation and the ToolRegistry
//! - The TerminationEvaluator
//! - Store traits with app-scoped isolation
//!
//! This crate does NOT care about:
//! - How tasks arrive (HTTP, scheduler ticks)
//! - How events are fanned out to subscribers
//! - Which backend persists the stores

pub mod error;
pub mod instrument;
pub mod store;
pub mod termination;
pub mod tool;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{CapabilityError, InstrumentError, SpawnError};
    pub use crate::instrument::{Instrument, InstrumentConfig};
    pub use crate::store::{
        AppDirectory, AppRecord, AppScope, ArrangementStore, CheckpointStore, HeartbeatStore,
        StoreError, TaskStore, UserProfile,
    };
    pub use crate::termination::{
        Severity, TerminationDecision, TerminationEvaluator, TerminationSignal,
    };
    pub use crate::tool::{
        capability, DiscrepancyAnalysis, ReasoningTool, ResolvedTools, SearchHit, SearchResults,
        SearchTool, SynthesisAnalysis, Tool, ToolError, ToolHandle, ToolRegistry,
    };
    pub use crate::types::{
        CheckpointFn, CheckpointRecord, CompositionSpec, ExecutionMetadata, FailoverEvent, Finding,
        Heartbeat, HeartbeatRun, HeartbeatRunStatus, InstrumentResult, Intent, IntentType,
        IterationCheckpoint, KnowledgeEntry, Outcome, ProcessType, Room, RoomBranch,
        RoomHeartbeat, RoomHeartbeatAck, RoomRegistration, RoomStatus, SavedArrangement,
        SequentialStepSpec, SpawnFn, TaskContext, TaskMinimalResponse, TaskPendingResponse,
        TaskPlan, TaskPreferences, TaskRecord, TaskRequest, TaskResponse, TaskStatus,
        TaskSubmitResponse, Thoroughness, TrustMetrics, TrustSuggestion, Urgency,
        DEFAULT_MAX_DEPTH,
    };
}

// Re-export key types at crate root
pub use error::{CapabilityError, InstrumentError, SpawnError};
pub use instrument::{Instrument, InstrumentConfig};
pub use store::{AppScope, StoreError};
pub use termination::{Severity, TerminationDecision, TerminationEvaluator, TerminationSignal};
pub use tool::{ReasoningTool, SearchTool, Tool, ToolError, ToolHandle, ToolRegistry};
pub use types::{
    ExecutionMetadata, Finding, InstrumentResult, Outcome, ProcessType, TaskContext, TaskRecord,
    TaskRequest, TaskResponse, TaskStatus,
};
