//! Composition patterns for orchestrating instrument pipelines.
//!
//! Three variants behind one small trait: sequential pipelines,
//! parallel fan-out with a merge step, and cross-room delegation.
//! Compositions hold instrument names only and resolve them through
//! the conductor at execution time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::InstrumentConfig;
use symphony_core::types::{
    CompositionSpec, InstrumentResult, Outcome, RoomBranch, TaskContext, TaskRequest,
};

use crate::conductor::Conductor;

pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MERGE_INSTRUMENT: &str = "synthesis";

/// Composition execution failure.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("unknown instrument '{0}' in composition")]
    UnknownInstrument(String),

    #[error("composition cancelled")]
    Cancelled,

    #[error("composition failed: {0}")]
    Internal(String),
}

impl From<InstrumentError> for CompositionError {
    fn from(err: InstrumentError) -> Self {
        match err {
            InstrumentError::Cancelled => CompositionError::Cancelled,
            InstrumentError::Internal(message) => CompositionError::Internal(message),
        }
    }
}

/// A higher-order loop combining instruments.
#[async_trait]
pub trait Composition: Send + Sync {
    fn name(&self) -> String;

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, CompositionError>;
}

/// Build a composition from a persisted spec.
pub fn from_spec(spec: &CompositionSpec) -> Result<Box<dyn Composition>, CompositionError> {
    match spec {
        CompositionSpec::Sequential { steps } => {
            let steps = steps
                .iter()
                .map(|step| (step.instrument.clone(), step.config.clone()))
                .collect();
            Ok(Box::new(SequentialComposition::new(steps)?))
        }
        CompositionSpec::Parallel {
            branches,
            merge_instrument,
            timeout_seconds,
        } => {
            let mut composition = ParallelComposition::new(branches.clone())?;
            if let Some(merge) = merge_instrument {
                composition = composition.with_merge_instrument(merge.clone());
            }
            if let Some(seconds) = timeout_seconds {
                composition = composition.with_timeout(Duration::from_secs(*seconds));
            }
            Ok(Box::new(composition))
        }
        CompositionSpec::CrossRoom { branches } => {
            Ok(Box::new(CrossRoomComposition::new(branches.clone())?))
        }
    }
}

/// Ordered pipeline; step i's result feeds step i+1 as input_results.
///
/// Per-step config overrides travel in the step's own context clone and
/// are never visible to sibling steps. A step returning inconclusive
/// halts the pipeline early.
pub struct SequentialComposition {
    steps: Vec<(String, Option<InstrumentConfig>)>,
}

impl SequentialComposition {
    pub fn new(steps: Vec<(String, Option<InstrumentConfig>)>) -> Result<Self, CompositionError> {
        if steps.is_empty() {
            return Err(CompositionError::Internal(
                "sequential composition requires at least one step".to_string(),
            ));
        }
        Ok(Self { steps })
    }
}

#[async_trait]
impl Composition for SequentialComposition {
    fn name(&self) -> String {
        self.steps
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, CompositionError> {
        tracing::info!(
            composition = %self.name(),
            steps = self.steps.len(),
            "sequential composition starting"
        );

        let mut total_iterations = 0u32;
        let mut all_sources: Vec<String> = Vec::new();
        let mut previous: Option<Vec<InstrumentResult>> = None;
        let mut last: Option<InstrumentResult> = None;

        for (step_index, (instrument_name, config)) in self.steps.iter().enumerate() {
            if context.is_cancelled() {
                return Err(CompositionError::Cancelled);
            }

            let instrument = conductor
                .instrument(instrument_name)
                .ok_or_else(|| CompositionError::UnknownInstrument(instrument_name.clone()))?;

            let mut step_context = context.for_step(previous.take());
            step_context.config_override = config.clone();

            let result = instrument.execute(query, &step_context).await?;
            total_iterations += result.iterations;
            all_sources.extend(result.sources_consulted.iter().cloned());

            tracing::info!(
                step = step_index + 1,
                instrument = %instrument_name,
                outcome = result.outcome.as_str(),
                confidence = result.confidence,
                "composition step complete"
            );

            let inconclusive = result.outcome == Outcome::Inconclusive;
            previous = Some(vec![result.clone()]);
            last = Some(result);
            if inconclusive {
                tracing::info!(step = step_index + 1, "early termination: inconclusive");
                break;
            }
        }

        let last = last.ok_or_else(|| {
            CompositionError::Internal("sequential composition produced no result".to_string())
        })?;

        all_sources.sort();
        all_sources.dedup();

        Ok(InstrumentResult {
            iterations: total_iterations,
            sources_consulted: all_sources,
            ..last
        })
    }
}

/// Concurrent fan-out over instrument branches with per-branch timeout,
/// merged through a fan-in instrument (synthesis by default).
pub struct ParallelComposition {
    branches: Vec<String>,
    merge_instrument: String,
    timeout: Duration,
}

impl ParallelComposition {
    pub fn new(branches: Vec<String>) -> Result<Self, CompositionError> {
        if branches.is_empty() {
            return Err(CompositionError::Internal(
                "parallel composition requires at least one branch".to_string(),
            ));
        }
        Ok(Self {
            branches,
            merge_instrument: DEFAULT_MERGE_INSTRUMENT.to_string(),
            timeout: DEFAULT_BRANCH_TIMEOUT,
        })
    }

    pub fn with_merge_instrument(mut self, merge_instrument: String) -> Self {
        self.merge_instrument = merge_instrument;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Composition for ParallelComposition {
    fn name(&self) -> String {
        format!(
            "parallel({}) -> {}",
            self.branches.join(" | "),
            self.merge_instrument
        )
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, CompositionError> {
        // Validate every instrument up front.
        for branch in &self.branches {
            if conductor.instrument(branch).is_none() {
                return Err(CompositionError::UnknownInstrument(branch.clone()));
            }
        }
        let merge_instrument = conductor
            .instrument(&self.merge_instrument)
            .ok_or_else(|| CompositionError::UnknownInstrument(self.merge_instrument.clone()))?;

        tracing::info!(
            composition = %self.name(),
            branches = self.branches.len(),
            "parallel composition starting"
        );

        let branch_context = context.for_step(None);
        let futures = self.branches.iter().map(|branch_name| {
            let instrument = conductor.instrument(branch_name);
            let branch_context = branch_context.clone();
            let branch_name = branch_name.clone();
            async move {
                let instrument = match instrument {
                    Some(instrument) => instrument,
                    None => {
                        return (
                            branch_name.clone(),
                            Err(format!("unknown instrument '{}'", branch_name)),
                        )
                    }
                };
                match tokio::time::timeout(self.timeout, instrument.execute(query, &branch_context))
                    .await
                {
                    Ok(Ok(result)) => (branch_name, Ok(result)),
                    Ok(Err(err)) => (branch_name, Err(err.to_string())),
                    Err(_) => (
                        branch_name,
                        Err(format!("timed out after {} ms", self.timeout.as_millis())),
                    ),
                }
            }
        });
        let outcomes = join_all(futures).await;

        if context.is_cancelled() {
            return Err(CompositionError::Cancelled);
        }

        let mut successful: Vec<InstrumentResult> = Vec::new();
        let mut failed: Vec<(String, String)> = Vec::new();
        let mut total_iterations = 0u32;
        let mut all_sources: Vec<String> = Vec::new();

        // Fan-in sees branches in completion order.
        for (branch_name, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    total_iterations += result.iterations;
                    all_sources.extend(result.sources_consulted.iter().cloned());
                    successful.push(result);
                }
                Err(error) => {
                    tracing::warn!(branch = %branch_name, error = %error, "branch failed");
                    failed.push((branch_name, error));
                }
            }
        }

        let failure_note = if failed.is_empty() {
            None
        } else {
            Some(
                failed
                    .iter()
                    .map(|(name, error)| format!("{}: {}", name, error))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        if successful.is_empty() {
            tracing::info!("all parallel branches failed");
            let mut result = InstrumentResult::new(
                Outcome::Inconclusive,
                format!("All {} parallel branches failed", self.branches.len()),
                0.0,
            );
            result.discrepancy = failure_note;
            return Ok(result);
        }

        let merge_context = context.for_step(Some(successful));
        let merge_result = merge_instrument.execute(query, &merge_context).await?;

        total_iterations += merge_result.iterations;
        all_sources.extend(merge_result.sources_consulted.iter().cloned());
        all_sources.sort();
        all_sources.dedup();

        let combined_discrepancy = match (failure_note, merge_result.discrepancy) {
            (Some(failures), Some(discrepancy)) => {
                Some(format!("Branch failures: {}; {}", failures, discrepancy))
            }
            (Some(failures), None) => Some(format!("Branch failures: {}", failures)),
            (None, discrepancy) => discrepancy,
        };

        Ok(InstrumentResult {
            iterations: total_iterations,
            sources_consulted: all_sources,
            discrepancy: combined_discrepancy,
            ..merge_result
        })
    }
}

/// Delegates branches to sibling rooms and merges the successes via
/// synthesis. The server self-registers as a room, so local branches
/// are first-class.
pub struct CrossRoomComposition {
    branches: Vec<RoomBranch>,
}

impl CrossRoomComposition {
    pub fn new(branches: Vec<RoomBranch>) -> Result<Self, CompositionError> {
        if branches.is_empty() {
            return Err(CompositionError::Internal(
                "cross-room composition requires at least one branch".to_string(),
            ));
        }
        Ok(Self { branches })
    }
}

#[async_trait]
impl Composition for CrossRoomComposition {
    fn name(&self) -> String {
        format!(
            "cross_room({})",
            self.branches
                .iter()
                .map(|branch| branch.room_id.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        )
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, CompositionError> {
        let rooms = conductor.rooms().ok_or_else(|| {
            CompositionError::Internal("no room registry configured".to_string())
        })?;
        let client = conductor.room_client().ok_or_else(|| {
            CompositionError::Internal("no room client configured".to_string())
        })?;

        let futures = self.branches.iter().map(|branch| {
            let rooms = rooms.clone();
            let client = client.clone();
            let conductor = conductor.clone();
            let base_context = context.for_step(None);
            async move {
                let room = match rooms.get(&branch.room_id) {
                    Some(room) if room.is_online() => room,
                    Some(_) => {
                        return (branch.room_id.clone(), Err("room offline".to_string()))
                    }
                    None => return (branch.room_id.clone(), Err("unknown room".to_string())),
                };

                if rooms.is_self(&room.room_id) {
                    // Local branch executes in-process through the conductor.
                    let request =
                        TaskRequest::new(branch.sub_query.clone()).with_context(base_context);
                    return match conductor.execute(request).await {
                        Ok(response) => {
                            (branch.room_id.clone(), Ok(response.into_instrument_result()))
                        }
                        Err(err) => (branch.room_id.clone(), Err(err.to_string())),
                    };
                }

                let request =
                    TaskRequest::new(branch.sub_query.clone()).with_context(base_context);
                match client.delegate(&room, &request).await {
                    Ok(result) => (branch.room_id.clone(), Ok(result)),
                    Err(err) => (branch.room_id.clone(), Err(err.to_string())),
                }
            }
        });
        let outcomes = join_all(futures).await;

        if context.is_cancelled() {
            return Err(CompositionError::Cancelled);
        }

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut total_iterations = 0u32;
        let mut all_sources: Vec<String> = Vec::new();

        for (room_id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    total_iterations += result.iterations;
                    all_sources.extend(result.sources_consulted.iter().cloned());
                    successful.push(result);
                }
                Err(error) => {
                    tracing::warn!(room_id = %room_id, error = %error, "room branch failed");
                    failed.push((room_id, error));
                }
            }
        }

        let failure_note = if failed.is_empty() {
            None
        } else {
            Some(
                failed
                    .iter()
                    .map(|(room_id, error)| format!("{}: {}", room_id, error))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        if successful.is_empty() {
            let mut result = InstrumentResult::new(
                Outcome::Inconclusive,
                format!("All {} room branches failed", self.branches.len()),
                0.0,
            );
            result.discrepancy = failure_note;
            return Ok(result);
        }

        let merge_instrument = conductor
            .instrument(DEFAULT_MERGE_INSTRUMENT)
            .ok_or_else(|| {
                CompositionError::UnknownInstrument(DEFAULT_MERGE_INSTRUMENT.to_string())
            })?;
        let merge_context = context.for_step(Some(successful));
        let merge_result = merge_instrument.execute(query, &merge_context).await?;

        total_iterations += merge_result.iterations;
        all_sources.extend(merge_result.sources_consulted.iter().cloned());
        all_sources.sort();
        all_sources.dedup();

        let combined_discrepancy = match (failure_note, merge_result.discrepancy) {
            (Some(failures), Some(discrepancy)) => {
                Some(format!("Room failures: {}; {}", failures, discrepancy))
            }
            (Some(failures), None) => Some(format!("Room failures: {}", failures)),
            (None, discrepancy) => discrepancy,
        };

        Ok(InstrumentResult {
            iterations: total_iterations,
            sources_consulted: all_sources,
            discrepancy: combined_discrepancy,
            ..merge_result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use symphony_core::instrument::Instrument;
    use symphony_core::types::{Finding, ProcessType};

    /// Scripted instrument; optionally sleeps, fails or inspects its
    /// per-step context.
    struct ScriptedInstrument {
        name: &'static str,
        outcome: Outcome,
        confidence: f64,
        iterations: u32,
        sources: Vec<&'static str>,
        delay: Option<Duration>,
        fail: bool,
        seen_overrides: Mutex<Vec<Option<InstrumentConfig>>>,
        seen_input_counts: Mutex<Vec<usize>>,
    }

    impl ScriptedInstrument {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                outcome: Outcome::Complete,
                confidence: 0.8,
                iterations: 2,
                sources: vec![],
                delay: None,
                fail: false,
                seen_overrides: Mutex::new(Vec::new()),
                seen_input_counts: Mutex::new(Vec::new()),
            }
        }

        fn with_outcome(mut self, outcome: Outcome) -> Self {
            self.outcome = outcome;
            self
        }

        fn with_sources(mut self, sources: Vec<&'static str>) -> Self {
            self.sources = sources;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Instrument for ScriptedInstrument {
        fn name(&self) -> &str {
            self.name
        }

        fn max_iterations(&self) -> u32 {
            5
        }

        fn process_type(&self) -> ProcessType {
            ProcessType::SemiAutonomic
        }

        fn required_capabilities(&self) -> &[&'static str] {
            &[]
        }

        async fn execute(
            &self,
            query: &str,
            context: &TaskContext,
        ) -> Result<InstrumentResult, InstrumentError> {
            self.seen_overrides
                .lock()
                .unwrap()
                .push(context.config_override.clone());
            self.seen_input_counts
                .lock()
                .unwrap()
                .push(context.input_results.as_ref().map(Vec::len).unwrap_or(0));

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(InstrumentError::Internal("scripted failure".to_string()));
            }
            Ok(InstrumentResult::new(
                self.outcome,
                format!("{} on {}", self.name, query),
                self.confidence,
            )
            .with_iterations(self.iterations)
            .with_sources(self.sources.iter().map(|s| s.to_string()).collect())
            .with_findings(vec![Finding::new(format!("{} finding", self.name), None, 0.8)]))
        }
    }

    fn conductor_of(
        instruments: Vec<(&str, Arc<ScriptedInstrument>)>,
    ) -> Arc<Conductor> {
        let map: HashMap<String, Arc<dyn Instrument>> = instruments
            .into_iter()
            .map(|(name, instrument)| (name.to_string(), instrument as Arc<dyn Instrument>))
            .collect();
        Arc::new(Conductor::new(map))
    }

    #[test]
    fn test_sequential_aggregates_and_pipes_results() {
        tokio_test::block_on(async {
            let first = Arc::new(
                ScriptedInstrument::new("research").with_sources(vec!["https://a.example"]),
            );
            let second = Arc::new(
                ScriptedInstrument::new("synthesis").with_sources(vec!["https://b.example"]),
            );
            let conductor = conductor_of(vec![
                ("research", first.clone()),
                ("synthesis", second.clone()),
            ]);

            let composition = SequentialComposition::new(vec![
                ("research".to_string(), None),
                ("synthesis".to_string(), None),
            ])
            .unwrap();

            let result = composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap();

            // iterations sum, sources union.
            assert_eq!(result.iterations, 4);
            assert_eq!(
                result.sources_consulted,
                vec!["https://a.example", "https://b.example"]
            );
            // Step 2 received step 1's result as input.
            assert_eq!(second.seen_input_counts.lock().unwrap()[0], 1);
            assert_eq!(first.seen_input_counts.lock().unwrap()[0], 0);
        });
    }

    #[test]
    fn test_sequential_config_override_is_step_local() {
        tokio_test::block_on(async {
            let first = Arc::new(ScriptedInstrument::new("research"));
            let second = Arc::new(ScriptedInstrument::new("synthesis"));
            let conductor = conductor_of(vec![
                ("research", first.clone()),
                ("synthesis", second.clone()),
            ]);

            let override_config = InstrumentConfig::default().with_max_iterations(1);
            let composition = SequentialComposition::new(vec![
                ("research".to_string(), Some(override_config.clone())),
                ("synthesis".to_string(), None),
            ])
            .unwrap();

            composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap();

            assert_eq!(
                first.seen_overrides.lock().unwrap()[0],
                Some(override_config)
            );
            // The sibling step never sees the override.
            assert_eq!(second.seen_overrides.lock().unwrap()[0], None);
        });
    }

    #[test]
    fn test_sequential_halts_on_inconclusive() {
        tokio_test::block_on(async {
            let first =
                Arc::new(ScriptedInstrument::new("research").with_outcome(Outcome::Inconclusive));
            let second = Arc::new(ScriptedInstrument::new("synthesis"));
            let conductor = conductor_of(vec![
                ("research", first.clone()),
                ("synthesis", second.clone()),
            ]);

            let composition = SequentialComposition::new(vec![
                ("research".to_string(), None),
                ("synthesis".to_string(), None),
            ])
            .unwrap();

            let result = composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap();

            assert_eq!(result.outcome, Outcome::Inconclusive);
            // The second step never ran.
            assert!(second.seen_overrides.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_parallel_partial_failure_merges_survivors() {
        tokio_test::block_on(async {
            let ok_a = Arc::new(
                ScriptedInstrument::new("branch_a").with_sources(vec!["https://a.example"]),
            );
            let ok_b = Arc::new(
                ScriptedInstrument::new("branch_b").with_sources(vec!["https://b.example"]),
            );
            let slow = Arc::new(
                ScriptedInstrument::new("branch_slow").with_delay(Duration::from_secs(5)),
            );
            let merge = Arc::new(ScriptedInstrument::new("synthesis"));
            let conductor = conductor_of(vec![
                ("branch_a", ok_a),
                ("branch_b", ok_b),
                ("branch_slow", slow),
                ("synthesis", merge.clone()),
            ]);

            let composition = ParallelComposition::new(vec![
                "branch_a".to_string(),
                "branch_b".to_string(),
                "branch_slow".to_string(),
            ])
            .unwrap()
            .with_timeout(Duration::from_millis(50));

            let result = composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap();

            // Survivor sources made it into the union; the timed-out
            // branch is named in the discrepancy.
            assert!(result
                .sources_consulted
                .contains(&"https://a.example".to_string()));
            assert!(result
                .sources_consulted
                .contains(&"https://b.example".to_string()));
            assert!(result.discrepancy.unwrap().contains("branch_slow"));
            // The merge instrument saw both surviving branches.
            assert_eq!(merge.seen_input_counts.lock().unwrap()[0], 2);
        });
    }

    #[test]
    fn test_parallel_all_failures_is_inconclusive() {
        tokio_test::block_on(async {
            let bad_a = Arc::new(ScriptedInstrument::new("branch_a").failing());
            let bad_b = Arc::new(ScriptedInstrument::new("branch_b").failing());
            let merge = Arc::new(ScriptedInstrument::new("synthesis"));
            let conductor = conductor_of(vec![
                ("branch_a", bad_a),
                ("branch_b", bad_b),
                ("synthesis", merge.clone()),
            ]);

            let composition = ParallelComposition::new(vec![
                "branch_a".to_string(),
                "branch_b".to_string(),
            ])
            .unwrap();

            let result = composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap();

            assert_eq!(result.outcome, Outcome::Inconclusive);
            let discrepancy = result.discrepancy.unwrap();
            assert!(discrepancy.contains("branch_a"));
            assert!(discrepancy.contains("branch_b"));
            // No merge on an empty survivor set.
            assert!(merge.seen_input_counts.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_unknown_branch_is_validated_up_front() {
        tokio_test::block_on(async {
            let conductor = conductor_of(vec![(
                "synthesis",
                Arc::new(ScriptedInstrument::new("synthesis")),
            )]);
            let composition = ParallelComposition::new(vec!["ghost".to_string()]).unwrap();

            let err = composition
                .execute("q", &TaskContext::default(), &conductor)
                .await
                .unwrap_err();
            assert!(matches!(err, CompositionError::UnknownInstrument(_)));
        });
    }
}
