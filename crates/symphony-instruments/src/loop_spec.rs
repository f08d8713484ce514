//! Dynamically registered phase-based loop specifications.
//!
//! A `LoopSpec` is a JSON-describable loop: named phases with prompt
//! templates, an iteration budget and a confidence target. Validated
//! specs become first-class instruments next to the baseline four.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::{effective_max_iterations, Instrument};
use symphony_core::termination::{TerminationEvaluator, TerminationSignal};
use symphony_core::tool::{capability, ReasoningTool};
use symphony_core::types::{
    CheckpointRecord, Finding, InstrumentResult, Outcome, ProcessType, TaskContext,
};

const REQUIRED_CAPABILITIES: [&str; 1] = [capability::REASONING];

const MAX_LOOP_ITERATIONS: u32 = 10;
const MAX_LOOP_PHASES: usize = 8;

/// One phase of a loop spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPhase {
    pub name: String,
    /// Template with `{query}` and `{findings}` placeholders.
    pub prompt_template: String,
}

/// A declarative loop specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub phases: Vec<LoopPhase>,
    pub max_iterations: u32,
    #[serde(default = "LoopSpec::default_confidence_threshold")]
    pub confidence_threshold: f64,
}

/// Validation verdict for a spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpecValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LoopSpec {
    fn default_confidence_threshold() -> f64 {
        0.8
    }

    pub fn validate(&self) -> LoopSpecValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("loop name must not be empty".to_string());
        }
        if self.phases.is_empty() {
            errors.push("loop requires at least one phase".to_string());
        }
        if self.phases.len() > MAX_LOOP_PHASES {
            errors.push(format!("loop exceeds {} phases", MAX_LOOP_PHASES));
        }
        if self.max_iterations == 0 {
            errors.push("max_iterations must be at least 1".to_string());
        }
        if self.max_iterations > MAX_LOOP_ITERATIONS {
            errors.push(format!(
                "max_iterations exceeds the {} iteration cap",
                MAX_LOOP_ITERATIONS
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            errors.push("confidence_threshold must be within [0, 1]".to_string());
        }

        let mut seen = std::collections::BTreeSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name.as_str()) {
                errors.push(format!("duplicate phase name '{}'", phase.name));
            }
            if !phase.prompt_template.contains("{query}") {
                warnings.push(format!(
                    "phase '{}' never references {{query}}",
                    phase.name
                ));
            }
        }

        LoopSpecValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Executes a validated `LoopSpec` against the reasoning tool.
#[derive(Debug)]
pub struct LoopInstrument {
    spec: LoopSpec,
    claude: Arc<dyn ReasoningTool>,
    termination: TerminationEvaluator,
}

impl LoopInstrument {
    /// Build from a spec; rejects invalid specs.
    pub fn new(spec: LoopSpec, claude: Arc<dyn ReasoningTool>) -> Result<Self, Vec<String>> {
        let validation = spec.validate();
        if !validation.valid {
            return Err(validation.errors);
        }
        let termination = TerminationEvaluator {
            confidence_threshold: spec.confidence_threshold,
            ..TerminationEvaluator::default()
        };
        Ok(Self {
            spec,
            claude,
            termination,
        })
    }

    pub fn spec(&self) -> &LoopSpec {
        &self.spec
    }

    fn render(template: &str, query: &str, findings: &[Finding]) -> String {
        let findings_text = findings
            .iter()
            .rev()
            .take(5)
            .map(|f| f.content.chars().take(160).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n- ");
        template
            .replace("{query}", query)
            .replace("{findings}", &findings_text)
    }
}

#[async_trait]
impl Instrument for LoopInstrument {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn max_iterations(&self) -> u32 {
        self.spec.max_iterations
    }

    fn process_type(&self) -> ProcessType {
        ProcessType::Conscious
    }

    fn required_capabilities(&self) -> &[&'static str] {
        &REQUIRED_CAPABILITIES
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
    ) -> Result<InstrumentResult, InstrumentError> {
        let max_iterations = effective_max_iterations(self, context).max(1);
        let mut findings: Vec<Finding> = Vec::new();
        let mut confidence_history: Vec<f64> = Vec::new();
        let mut iteration = 0u32;
        let mut outcome = Outcome::Bounded;

        loop {
            tokio::task::yield_now().await;
            if context.is_cancelled() {
                return Err(InstrumentError::Cancelled);
            }

            iteration += 1;
            let iteration_start = Instant::now();
            let previous_count = findings.len();
            let mut phase_failures = 0usize;

            for phase in &self.spec.phases {
                let prompt = Self::render(&phase.prompt_template, query, &findings);
                match self.claude.complete(&prompt, None).await {
                    Ok(response) => {
                        findings.push(Finding::new(
                            response,
                            Some(format!("{}:{}", self.spec.name, phase.name)),
                            0.6,
                        ));
                    }
                    Err(err) => {
                        phase_failures += 1;
                        tracing::warn!(
                            error = %err,
                            phase = %phase.name,
                            "loop phase failed"
                        );
                        findings.push(Finding::new(
                            format!("phase '{}' failed: {}", phase.name, err),
                            None,
                            0.1,
                        ));
                    }
                }
            }

            let produced = findings.len() - previous_count;
            let confidence = self.termination.calculate_confidence(
                &findings,
                0,
                phase_failures == 0 && produced > 0,
            );
            confidence_history.push(confidence);

            let decision = self.termination.evaluate(&TerminationSignal {
                iteration,
                max_iterations,
                confidence_history: &confidence_history,
                new_sources: produced.saturating_sub(phase_failures),
                contradiction: None,
            });

            context
                .emit_checkpoint(CheckpointRecord::new(
                    iteration,
                    "reflection",
                    json!({ "phases": self.spec.phases.len() }),
                    json!({
                        "produced": produced,
                        "failures": phase_failures,
                        "confidence": confidence,
                        "should_terminate": decision.stop,
                    }),
                    iteration_start.elapsed().as_millis() as u64,
                ))
                .await;

            if decision.stop {
                outcome = decision.outcome.unwrap_or(Outcome::Bounded);
                break;
            }
        }

        let confidence = confidence_history.last().copied().unwrap_or(0.0);
        let summary = findings
            .last()
            .map(|f| f.content.clone())
            .unwrap_or_else(|| "Loop produced no findings.".to_string());

        Ok(InstrumentResult::new(outcome, summary, confidence)
            .with_findings(findings)
            .with_iterations(iteration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockReasoning;

    fn spec(max_iterations: u32) -> LoopSpec {
        LoopSpec {
            name: "triage".to_string(),
            description: None,
            phases: vec![
                LoopPhase {
                    name: "observe".to_string(),
                    prompt_template: "Observe: {query}".to_string(),
                },
                LoopPhase {
                    name: "conclude".to_string(),
                    prompt_template: "Conclude on {query} given:\n- {findings}".to_string(),
                },
            ],
            max_iterations,
            confidence_threshold: 0.8,
        }
    }

    #[test]
    fn test_validation_rejects_bad_specs() {
        let mut bad = spec(0);
        bad.phases.push(LoopPhase {
            name: "observe".to_string(),
            prompt_template: "again".to_string(),
        });

        let validation = bad.validate();
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("max_iterations")));
        assert!(validation.errors.iter().any(|e| e.contains("duplicate")));
        // The phase without {query} only warns.
        assert!(!validation.warnings.is_empty());

        assert!(LoopInstrument::new(bad, Arc::new(MockReasoning::answering("x"))).is_err());
    }

    #[test]
    fn test_loop_runs_phases_and_terminates() {
        tokio_test::block_on(async {
            let reasoning = Arc::new(MockReasoning::answering("observation"));
            let instrument = LoopInstrument::new(spec(2), reasoning.clone()).unwrap();

            let result = instrument
                .execute("classify this", &TaskContext::default())
                .await
                .unwrap();

            assert!(result.iterations <= 2);
            assert!(!result.findings.is_empty());
            // Two phases per iteration.
            assert_eq!(
                reasoning
                    .complete_calls
                    .load(std::sync::atomic::Ordering::SeqCst),
                (result.iterations as usize) * 2
            );
        });
    }
}
