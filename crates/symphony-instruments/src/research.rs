//! Research instrument - iterative scientific-method loop.
//!
//! Iteration shape: hypothesize (generate search queries) -> gather
//! (web search) -> analyze (confidence) -> reflect (termination check),
//! emitting one checkpoint per iteration. Tool failures inside an
//! iteration degrade to low-confidence synthetic findings; the loop
//! itself only fails on cancellation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::{effective_max_iterations, Instrument};
use symphony_core::termination::{Severity, TerminationEvaluator, TerminationSignal};
use symphony_core::tool::{capability, ReasoningTool, SearchTool};
use symphony_core::types::{
    CheckpointRecord, Finding, InstrumentResult, Outcome, ProcessType, TaskContext,
};

const REQUIRED_CAPABILITIES: [&str; 2] = [capability::REASONING, capability::WEB_SEARCH];
const OPTIONAL_CAPABILITIES: [&str; 1] = [capability::SYNTHESIS];

pub const DEFAULT_RESEARCH_MAX_ITERATIONS: u32 = 5;
const MAX_QUERIES_PER_ITERATION: usize = 3;
const RESULTS_PER_QUERY: usize = 3;
/// Confidence assigned to the engine's direct answer.
const ENGINE_ANSWER_CONFIDENCE: f64 = 0.85;

/// Iterative web research loop.
#[derive(Debug)]
pub struct ResearchInstrument {
    claude: Arc<dyn ReasoningTool>,
    search: Arc<dyn SearchTool>,
    termination: TerminationEvaluator,
    max_iterations: u32,
}

impl ResearchInstrument {
    pub fn new(claude: Arc<dyn ReasoningTool>, search: Arc<dyn SearchTool>) -> Self {
        Self {
            claude,
            search,
            termination: TerminationEvaluator::default(),
            max_iterations: DEFAULT_RESEARCH_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_termination(mut self, termination: TerminationEvaluator) -> Self {
        self.termination = termination;
        self
    }

    fn evaluator_for(&self, context: &TaskContext) -> TerminationEvaluator {
        let mut evaluator = self.termination.clone();
        if let Some(config) = &context.config_override {
            if let Some(threshold) = config.confidence_threshold {
                evaluator.confidence_threshold = threshold;
            }
            if let Some(delta) = config.confidence_delta_threshold {
                evaluator.delta_threshold = delta;
            }
        }
        evaluator
    }

    /// Phase 2: generate search queries for this iteration.
    async fn generate_hypotheses(
        &self,
        query: &str,
        findings: &[Finding],
        iteration: u32,
    ) -> Vec<String> {
        let system = "You are a search query generator. Generate 2-3 specific, targeted \
                      search queries covering different aspects of the research problem. \
                      Return ONLY the queries, one per line.";
        let mut prompt = format!("Research problem: {}\n\nIteration: {}\n", query, iteration);
        if !findings.is_empty() {
            prompt.push_str("\nAlready known (do not repeat):\n");
            for finding in findings.iter().rev().take(5) {
                let preview: String = finding.content.chars().take(100).collect();
                prompt.push_str(&format!("- {}\n", preview));
            }
        }

        match self.claude.complete(&prompt, Some(system)).await {
            Ok(response) => {
                let queries: Vec<String> = response
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .take(MAX_QUERIES_PER_ITERATION)
                    .collect();
                if queries.is_empty() {
                    vec![query.to_string()]
                } else {
                    queries
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "hypothesis generation failed, reusing raw query");
                vec![query.to_string()]
            }
        }
    }

    /// Phase 3: run the searches, degrading failures into findings.
    async fn gather(
        &self,
        queries: &[String],
        findings: &mut Vec<Finding>,
        sources: &mut Vec<String>,
    ) -> usize {
        let mut tool_failures = 0;
        for search_query in queries {
            match self.search.search(search_query, RESULTS_PER_QUERY).await {
                Ok(results) => {
                    if let Some(answer) = results.answer {
                        findings.push(Finding::new(
                            answer,
                            Some(format!("{}_answer", self.search.name())),
                            ENGINE_ANSWER_CONFIDENCE,
                        ));
                    }
                    for hit in results.results {
                        sources.push(hit.url.clone());
                        findings.push(Finding::new(
                            format!("{}: {}", hit.title, hit.content),
                            Some(hit.url),
                            hit.score,
                        ));
                    }
                }
                Err(err) => {
                    tool_failures += 1;
                    tracing::warn!(error = %err, query = %search_query, "search failed");
                    findings.push(Finding::new(
                        format!("search '{}' failed: {}", search_query, err),
                        None,
                        0.1,
                    ));
                }
            }
        }
        tool_failures
    }

    /// Final pass: synthesize the summary and surface contradictions.
    async fn summarize(
        &self,
        query: &str,
        findings: &[Finding],
        outcome: Outcome,
        confidence: f64,
    ) -> (String, Outcome, Option<String>, Vec<String>) {
        if findings.is_empty() {
            return (
                "No findings were discovered during research.".to_string(),
                outcome,
                None,
                Vec::new(),
            );
        }

        let texts: Vec<String> = findings.iter().map(|f| f.content.clone()).collect();
        let analysis = match self.claude.synthesize(&texts, query).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(error = %err, "final synthesis failed, joining findings");
                let fallback = texts
                    .iter()
                    .take(3)
                    .map(|t| t.chars().take(160).collect::<String>())
                    .collect::<Vec<_>>()
                    .join(" / ");
                return (fallback, outcome, None, Vec::new());
            }
        };

        let mut final_outcome = outcome;
        let mut discrepancy = None;
        let mut followups = Vec::new();

        if analysis.has_contradictions {
            if let Some(hint) = &analysis.contradiction_hint {
                match self.claude.analyze_discrepancy(&texts, query, hint).await {
                    Ok(found) => {
                        final_outcome =
                            adjust_outcome_for_severity(outcome, confidence, found.severity);
                        discrepancy = Some(found.description);
                        if final_outcome == Outcome::Inconclusive {
                            followups = found.suggested_refinements;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "discrepancy analysis failed");
                        discrepancy = Some(hint.clone());
                    }
                }
            }
        }

        (analysis.summary, final_outcome, discrepancy, followups)
    }
}

/// Outcome adjustment mirroring the synthesis severity policy.
fn adjust_outcome_for_severity(outcome: Outcome, confidence: f64, severity: Severity) -> Outcome {
    match severity {
        Severity::Significant => Outcome::Inconclusive,
        Severity::Moderate => {
            if outcome == Outcome::Complete && confidence >= 0.9 {
                outcome
            } else {
                Outcome::Inconclusive
            }
        }
        Severity::Minor => outcome,
    }
}

#[async_trait]
impl Instrument for ResearchInstrument {
    fn name(&self) -> &str {
        "research"
    }

    fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn process_type(&self) -> ProcessType {
        ProcessType::SemiAutonomic
    }

    fn required_capabilities(&self) -> &[&'static str] {
        &REQUIRED_CAPABILITIES
    }

    fn optional_capabilities(&self) -> &[&'static str] {
        &OPTIONAL_CAPABILITIES
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
    ) -> Result<InstrumentResult, InstrumentError> {
        let max_iterations = effective_max_iterations(self, context).max(1);
        let evaluator = self.evaluator_for(context);

        let mut findings: Vec<Finding> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut confidence_history: Vec<f64> = Vec::new();
        let mut seen_sources: BTreeSet<String> = BTreeSet::new();
        let mut iteration = 0u32;
        let mut outcome = Outcome::Bounded;
        let mut total_tool_failures = 0usize;

        tracing::info!(instrument = "research", max_iterations, "starting loop");

        loop {
            // Iteration boundary: yield and observe cancellation.
            tokio::task::yield_now().await;
            if context.is_cancelled() {
                return Err(InstrumentError::Cancelled);
            }

            iteration += 1;
            let iteration_start = Instant::now();
            let previous_finding_count = findings.len();

            let search_queries = self.generate_hypotheses(query, &findings, iteration).await;
            total_tool_failures += self
                .gather(&search_queries, &mut findings, &mut sources)
                .await;

            let new_sources = sources
                .iter()
                .filter(|source| seen_sources.insert((*source).clone()))
                .count();
            let has_answer = findings[previous_finding_count..]
                .iter()
                .any(|f| f.confidence > 0.8);
            let confidence =
                evaluator.calculate_confidence(&findings, seen_sources.len(), has_answer);
            confidence_history.push(confidence);

            let decision = evaluator.evaluate(&TerminationSignal {
                iteration,
                max_iterations,
                confidence_history: &confidence_history,
                new_sources,
                contradiction: None,
            });

            let duration_ms = iteration_start.elapsed().as_millis() as u64;
            context
                .emit_checkpoint(CheckpointRecord::new(
                    iteration,
                    "reflection",
                    json!({ "search_queries": search_queries }),
                    json!({
                        "new_findings": findings.len() - previous_finding_count,
                        "total_findings": findings.len(),
                        "confidence": confidence,
                        "should_terminate": decision.stop,
                    }),
                    duration_ms,
                ))
                .await;

            tracing::debug!(
                iteration,
                confidence,
                new_sources,
                stop = decision.stop,
                "research iteration finished"
            );

            if decision.stop {
                outcome = decision.outcome.unwrap_or(Outcome::Bounded);
                break;
            }
        }

        // A loop that produced nothing but tool failures made no progress.
        if seen_sources.is_empty() && total_tool_failures > 0 {
            outcome = Outcome::Bounded;
        }

        let confidence = confidence_history.last().copied().unwrap_or(0.0);
        let (summary, outcome, discrepancy, followups) =
            self.summarize(query, &findings, outcome, confidence).await;

        let mut result = InstrumentResult::new(outcome, summary, confidence)
            .with_findings(findings)
            .with_iterations(iteration)
            .with_sources(seen_sources.into_iter().collect())
            .with_followups(followups);
        result.discrepancy = discrepancy;
        Ok(result)
    }
}
