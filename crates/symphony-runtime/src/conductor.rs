//! The Conductor: task analysis, instrument routing and execution.
//!
//! Routes a query to an instrument, applies spawn-depth bookkeeping,
//! injects the spawn callback, selects an execution room (with failover
//! back to the server) and wraps the instrument result into a
//! `TaskResponse`. Compositions and sub-tasks recurse through the
//! conductor via injected callbacks, never via direct import.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures_util::future::BoxFuture;
use thiserror::Error;

use symphony_core::error::{InstrumentError, SpawnError};
use symphony_core::instrument::Instrument;
use symphony_core::types::{
    ExecutionMetadata, FailoverEvent, InstrumentResult, IntentType, Outcome, ProcessType,
    TaskContext, TaskPlan, TaskRequest, TaskResponse, Thoroughness,
};

use crate::composition::{Composition, CompositionError};
use crate::privacy::{KeywordPrivacyClassifier, PrivacyClassifier, PrivacyLevel};
use crate::rooms::{RoomClient, RoomRegistry};

/// Keywords that route a query to research.
const RESEARCH_KEYWORDS: [&str; 21] = [
    "research",
    "find",
    "search",
    "look up",
    "investigate",
    "explore",
    "discover",
    "latest",
    "recent",
    "current",
    "news",
    "developments",
    "trends",
    "compare",
    "comparison",
    "review",
    "analysis",
    "what are the best",
    "how do i",
    "guide",
    "tutorial",
];

/// Phrases marking comparison-style queries.
const COMPARISON_MARKERS: [&str; 5] = [
    " vs ",
    " vs. ",
    "versus",
    "difference between",
    "pros and cons",
];

/// Queries longer than this are routed to research.
const LONG_QUERY_CHARS: usize = 200;

/// Conductor execution failure.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution failed: {0}")]
    Internal(String),
}

impl From<InstrumentError> for ConductorError {
    fn from(err: InstrumentError) -> Self {
        match err {
            InstrumentError::Cancelled => ConductorError::Cancelled,
            InstrumentError::Internal(message) => ConductorError::Internal(message),
        }
    }
}

impl From<CompositionError> for ConductorError {
    fn from(err: CompositionError) -> Self {
        match err {
            CompositionError::Cancelled => ConductorError::Cancelled,
            CompositionError::UnknownInstrument(name) => ConductorError::UnknownInstrument(name),
            CompositionError::Internal(message) => ConductorError::Internal(message),
        }
    }
}

/// Routes queries to instruments and executes them.
pub struct Conductor {
    instruments: RwLock<HashMap<String, Arc<dyn Instrument>>>,
    rooms: Option<Arc<RoomRegistry>>,
    room_client: Option<Arc<RoomClient>>,
    privacy: Arc<dyn PrivacyClassifier>,
}

impl Conductor {
    pub fn new(instruments: HashMap<String, Arc<dyn Instrument>>) -> Self {
        Self {
            instruments: RwLock::new(instruments),
            rooms: None,
            room_client: None,
            privacy: Arc::new(KeywordPrivacyClassifier::new()),
        }
    }

    /// Enable cross-room delegation.
    pub fn with_rooms(mut self, rooms: Arc<RoomRegistry>, client: Arc<RoomClient>) -> Self {
        self.rooms = Some(rooms);
        self.room_client = Some(client);
        self
    }

    pub fn with_privacy(mut self, privacy: Arc<dyn PrivacyClassifier>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn rooms(&self) -> Option<&Arc<RoomRegistry>> {
        self.rooms.as_ref()
    }

    pub fn room_client(&self) -> Option<&Arc<RoomClient>> {
        self.room_client.as_ref()
    }

    /// Register a dynamic instrument (e.g. a validated loop spec).
    pub fn register_instrument(&self, instrument: Arc<dyn Instrument>) {
        let name = instrument.name().to_string();
        match self.instruments.write() {
            Ok(mut instruments) => {
                instruments.insert(name, instrument);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(name, instrument);
            }
        }
    }

    pub fn instrument(&self, name: &str) -> Option<Arc<dyn Instrument>> {
        match self.instruments.read() {
            Ok(instruments) => instruments.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }

    pub fn instrument_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.instruments.read() {
            Ok(instruments) => instruments.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        names.sort();
        names
    }

    /// Analyze a task and pick the instrument. First match wins:
    /// image attachments -> vision; research intent, long or
    /// research-flavored queries -> research; otherwise note.
    pub fn analyze_and_route(&self, request: &TaskRequest) -> String {
        if request
            .context
            .as_ref()
            .map(TaskContext::has_image_attachment)
            .unwrap_or(false)
        {
            tracing::debug!(task_id = %request.id, "routing to vision: image attachments");
            return "vision".to_string();
        }

        let query = request.query.to_ascii_lowercase();
        let research = request
            .intent
            .as_ref()
            .map(|intent| intent.intent_type == IntentType::Research)
            .unwrap_or(false)
            || request.query.chars().count() > LONG_QUERY_CHARS
            || RESEARCH_KEYWORDS.iter().any(|kw| query.contains(kw))
            || COMPARISON_MARKERS.iter().any(|m| query.contains(m))
            || query.matches('?').count() > 1
            || request
                .preferences
                .as_ref()
                .map(|p| p.thoroughness == Thoroughness::Thorough)
                .unwrap_or(false);

        if research {
            tracing::debug!(task_id = %request.id, "routing to research");
            "research".to_string()
        } else {
            tracing::debug!(task_id = %request.id, "routing to note: simple query");
            "note".to_string()
        }
    }

    /// Process visibility for an instrument name; unknown names are
    /// semi-autonomic, compositions are conscious.
    pub fn process_type_for(&self, instrument_name: &str) -> ProcessType {
        self.instrument(instrument_name)
            .map(|instrument| instrument.process_type())
            .unwrap_or(ProcessType::SemiAutonomic)
    }

    /// Build the approval plan shown to trust-level-0 callers.
    pub fn build_plan(&self, request: &TaskRequest) -> TaskPlan {
        let instrument_name = self.analyze_and_route(request);
        let estimated_iterations = self
            .instrument(&instrument_name)
            .map(|instrument| instrument.max_iterations())
            .unwrap_or(1);
        TaskPlan {
            task_id: request.id.clone(),
            query: request.query.clone(),
            instrument: instrument_name.clone(),
            process_type: self.process_type_for(&instrument_name),
            estimated_iterations,
            description: format!(
                "Run the {} instrument for up to {} iteration(s)",
                instrument_name, estimated_iterations
            ),
            requires_approval: true,
        }
    }

    /// Execute a task request end-to-end.
    ///
    /// Boxed so the injected spawn callback can re-enter the conductor
    /// recursively.
    pub fn execute(
        self: &Arc<Self>,
        request: TaskRequest,
    ) -> BoxFuture<'static, Result<TaskResponse, ConductorError>> {
        let conductor = self.clone();
        Box::pin(async move { conductor.execute_inner(request).await })
    }

    async fn execute_inner(
        self: Arc<Self>,
        request: TaskRequest,
    ) -> Result<TaskResponse, ConductorError> {
        let started = Instant::now();

        let mut context = request.context.clone().unwrap_or_default();
        let current_depth = context.depth;
        let mut max_depth = context.max_depth;
        if let Some(preferences) = &request.preferences {
            if let Some(limit) = preferences.max_spawn_depth {
                max_depth = limit;
            }
        }
        context.max_depth = max_depth;
        let spawn_fn = self.spawn_callback(&request, &context, current_depth, max_depth);
        context.spawn_fn = Some(spawn_fn);

        let request = TaskRequest {
            context: Some(context),
            ..request
        };

        let instrument_name = self.analyze_and_route(&request);
        let instrument = self
            .instrument(&instrument_name)
            .ok_or_else(|| ConductorError::UnknownInstrument(instrument_name.clone()))?;

        tracing::info!(
            task_id = %request.id,
            instrument = %instrument_name,
            depth = current_depth,
            max_depth,
            "executing task"
        );

        // Room selection with failover back to local execution.
        let mut failover_events: Vec<FailoverEvent> = Vec::new();
        let mut room_id: Option<String> = None;
        if let (Some(rooms), Some(client)) = (&self.rooms, &self.room_client) {
            let privacy = self.privacy.classify(&request);
            let locality_required = privacy == PrivacyLevel::Sensitive;
            if let Some(room) =
                rooms.select_room(instrument.required_capabilities(), locality_required)
            {
                if rooms.is_self(&room.room_id) {
                    room_id = Some(room.room_id);
                } else {
                    match client.delegate(&room, &request).await {
                        Ok(result) => {
                            return Ok(self.build_response(
                                &request,
                                &instrument_name,
                                instrument.process_type(),
                                result,
                                started,
                                Some(room.room_id),
                                failover_events,
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(
                                task_id = %request.id,
                                room_id = %room.room_id,
                                error = %err,
                                "delegation failed, falling back to local execution"
                            );
                            failover_events
                                .push(FailoverEvent::new(room.room_id.as_str(), err.to_string()));
                            room_id = Some(rooms.self_room_id().to_string());
                        }
                    }
                }
            }
        }

        let context = match &request.context {
            Some(context) => context,
            None => return Err(ConductorError::Internal("missing task context".to_string())),
        };
        let result = instrument.execute(&request.query, context).await?;

        Ok(self.build_response(
            &request,
            &instrument_name,
            instrument.process_type(),
            result,
            started,
            room_id,
            failover_events,
        ))
    }

    /// Execute a persisted arrangement spec.
    pub async fn execute_spec(
        self: &Arc<Self>,
        spec: &symphony_core::types::CompositionSpec,
        request: TaskRequest,
    ) -> Result<TaskResponse, ConductorError> {
        let composition = crate::composition::from_spec(spec)?;
        self.execute_composition(composition.as_ref(), request).await
    }

    /// Execute a composition and wrap its result; compositions always
    /// run consciously.
    pub async fn execute_composition(
        self: &Arc<Self>,
        composition: &dyn Composition,
        request: TaskRequest,
    ) -> Result<TaskResponse, ConductorError> {
        let started = Instant::now();
        let context = request.context.clone().unwrap_or_default();

        tracing::info!(
            task_id = %request.id,
            composition = %composition.name(),
            "executing composition"
        );

        let result = composition.execute(&request.query, &context, self).await?;
        Ok(self.build_response(
            &request,
            &composition.name(),
            ProcessType::Conscious,
            result,
            started,
            None,
            Vec::new(),
        ))
    }

    fn spawn_callback(
        self: &Arc<Self>,
        request: &TaskRequest,
        context: &TaskContext,
        current_depth: u32,
        max_depth: u32,
    ) -> symphony_core::types::SpawnFn {
        let conductor = self.clone();
        // Captured before spawn_fn injection, so the clone carries no
        // callback of its own.
        let base_context = context.clone();
        let preferences = request.preferences.clone();

        Arc::new(move |sub_query: String, sub_context: Option<TaskContext>| {
            let conductor = conductor.clone();
            let base_context = base_context.clone();
            let preferences = preferences.clone();

            Box::pin(async move {
                let attempted = current_depth + 1;
                if attempted > max_depth {
                    return Err(SpawnError::DepthExceeded {
                        attempted,
                        max: max_depth,
                    });
                }

                let mut child = base_context;
                child.depth = attempted;
                child.max_depth = max_depth;
                child.spawn_fn = None; // re-injected by the recursive call
                child.checkpoint_fn = None; // sub-results embed, not stream
                if let Some(sub) = sub_context {
                    if sub.input_results.is_some() {
                        child.input_results = sub.input_results;
                    }
                    if sub.conversation_summary.is_some() {
                        child.conversation_summary = sub.conversation_summary;
                    }
                    if !sub.attachments.is_empty() {
                        child.attachments = sub.attachments;
                    }
                }

                let sub_request = TaskRequest::new(sub_query).with_context(child);
                let sub_request = TaskRequest {
                    preferences: preferences.clone(),
                    ..sub_request
                };

                let response = conductor.execute(sub_request).await.map_err(|err| match err {
                    ConductorError::Cancelled => SpawnError::Cancelled,
                    other => SpawnError::Failed(other.to_string()),
                })?;
                Ok(response.into_instrument_result())
            }) as BoxFuture<'static, Result<InstrumentResult, SpawnError>>
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_response(
        &self,
        request: &TaskRequest,
        instrument_name: &str,
        process_type: ProcessType,
        result: InstrumentResult,
        started: Instant,
        room_id: Option<String>,
        failover_events: Vec<FailoverEvent>,
    ) -> TaskResponse {
        TaskResponse {
            request_id: request.id.clone(),
            outcome: result.outcome,
            summary: result.summary,
            confidence: result.confidence,
            metadata: ExecutionMetadata {
                instrument_used: instrument_name.to_string(),
                iterations: result.iterations,
                duration_ms: started.elapsed().as_millis() as u64,
                sources_consulted: result.sources_consulted,
                process_type,
                room_id,
                failover_events,
            },
            findings: result.findings,
            discrepancy: result.discrepancy,
            suggested_followups: annotate_followups(result.outcome, result.suggested_followups),
        }
    }
}

const FOLLOWUP_PREFIXES: [&str; 4] = ["[proactive]", "[pushback]", "[scoping]", "[education]"];

/// Prefix unannotated follow-ups with a category derived from the
/// outcome class.
fn annotate_followups(outcome: Outcome, followups: Vec<String>) -> Vec<String> {
    let default_prefix = match outcome {
        Outcome::Complete => "[proactive]",
        Outcome::Saturated => "[education]",
        Outcome::Bounded => "[pushback]",
        Outcome::Inconclusive => "[scoping]",
    };
    followups
        .into_iter()
        .map(|followup| {
            if FOLLOWUP_PREFIXES
                .iter()
                .any(|prefix| followup.starts_with(prefix))
            {
                followup
            } else {
                format!("{} {}", default_prefix, followup)
            }
        })
        .collect()
}
