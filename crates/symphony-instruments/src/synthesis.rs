//! Synthesis instrument - merges multiple instrument results.
//!
//! Combines findings from upstream `InstrumentResult`s, detects
//! contradictions across them and produces a confidence-weighted merged
//! output. Used by compositions as the fan-in step; rarely routed to
//! directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::Instrument;
use symphony_core::termination::Severity;
use symphony_core::tool::{capability, ReasoningTool, SynthesisAnalysis};
use symphony_core::types::{
    Finding, InstrumentResult, Outcome, ProcessType, TaskContext,
};

const REQUIRED_CAPABILITIES: [&str; 2] = [capability::REASONING, capability::SYNTHESIS];

/// Below this merged confidence a second synthesis pass runs.
const RESYNTHESIS_THRESHOLD: f64 = 0.6;

/// Initial synthesis plus at most one re-synthesis pass.
#[derive(Debug)]
pub struct SynthesisInstrument {
    claude: Arc<dyn ReasoningTool>,
}

impl SynthesisInstrument {
    pub fn new(claude: Arc<dyn ReasoningTool>) -> Self {
        Self { claude }
    }

    fn collect_findings(input_results: &[InstrumentResult]) -> (Vec<Finding>, Vec<String>) {
        let mut findings = Vec::new();
        let mut sources = BTreeSet::new();
        for result in input_results {
            for source in &result.sources_consulted {
                sources.insert(source.clone());
            }
            findings.extend(result.findings.iter().cloned());
        }
        (findings, sources.into_iter().collect())
    }

    /// Weighted average of input confidences (weighted by finding count)
    /// plus a small agreement bonus, capped at 1.0.
    fn merged_confidence(input_results: &[InstrumentResult]) -> f64 {
        if input_results.is_empty() {
            return 0.0;
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for result in input_results {
            let weight = result.findings.len().max(1) as f64;
            weighted_sum += result.confidence * weight;
            total_weight += weight;
        }
        let base = weighted_sum / total_weight;

        let agreement_bonus = if input_results.len() >= 2
            && input_results.iter().all(|r| r.confidence >= 0.7)
        {
            0.05
        } else {
            0.0
        };

        (base + agreement_bonus).min(1.0)
    }

    /// Annotate finding text with confidence bands for weighting.
    fn weighted_texts(findings: &[Finding]) -> Vec<String> {
        findings
            .iter()
            .map(|finding| {
                if finding.confidence >= 0.8 {
                    format!("[HIGH CONFIDENCE] {}", finding.content)
                } else if finding.confidence >= 0.5 {
                    finding.content.clone()
                } else {
                    format!("[LOW CONFIDENCE] {}", finding.content)
                }
            })
            .collect()
    }

    fn outcome_for_severity(confidence: f64, severity: Severity) -> Outcome {
        match severity {
            Severity::Significant => Outcome::Inconclusive,
            Severity::Moderate if confidence < 0.9 => Outcome::Inconclusive,
            _ => Outcome::Complete,
        }
    }

    async fn handle_contradictions(
        &self,
        query: &str,
        texts: &[String],
        hint: &str,
        confidence: f64,
    ) -> (Option<String>, Outcome, Vec<String>) {
        match self.claude.analyze_discrepancy(texts, query, hint).await {
            Ok(analysis) => {
                let outcome = Self::outcome_for_severity(confidence, analysis.severity);
                let followups = if outcome == Outcome::Inconclusive {
                    analysis.suggested_refinements
                } else {
                    Vec::new()
                };
                (Some(analysis.description), outcome, followups)
            }
            Err(err) => {
                tracing::warn!(error = %err, "contradiction analysis failed");
                (None, Outcome::Complete, Vec::new())
            }
        }
    }

    fn empty_result(query: &str) -> InstrumentResult {
        InstrumentResult::new(
            Outcome::Bounded,
            format!("No input results available to synthesize for query: {}", query),
            0.0,
        )
        .with_followups(vec![
            "Run research instruments first to gather findings".to_string()
        ])
    }
}

#[async_trait]
impl Instrument for SynthesisInstrument {
    fn name(&self) -> &str {
        "synthesis"
    }

    fn max_iterations(&self) -> u32 {
        2
    }

    fn process_type(&self) -> ProcessType {
        ProcessType::SemiAutonomic
    }

    fn required_capabilities(&self) -> &[&'static str] {
        &REQUIRED_CAPABILITIES
    }

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
    ) -> Result<InstrumentResult, InstrumentError> {
        if context.is_cancelled() {
            return Err(InstrumentError::Cancelled);
        }

        let input_results = match &context.input_results {
            Some(results) if !results.is_empty() => results.clone(),
            _ => {
                tracing::warn!("synthesis called with no input results");
                return Ok(Self::empty_result(query));
            }
        };

        let (findings, sources) = Self::collect_findings(&input_results);
        if findings.is_empty() {
            return Ok(Self::empty_result(query));
        }

        let texts = Self::weighted_texts(&findings);
        let mut iteration = 1u32;
        let mut confidence = Self::merged_confidence(&input_results);

        let mut analysis = match self.claude.synthesize(&texts, query).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(error = %err, "synthesis pass failed");
                SynthesisAnalysis {
                    summary: texts
                        .iter()
                        .take(3)
                        .map(|t| t.chars().take(160).collect::<String>())
                        .collect::<Vec<_>>()
                        .join(" / "),
                    has_contradictions: false,
                    contradiction_hint: None,
                }
            }
        };

        let mut discrepancy = None;
        let mut outcome = Outcome::Complete;
        let mut followups = Vec::new();

        if analysis.has_contradictions {
            if let Some(hint) = analysis.contradiction_hint.clone() {
                let (found, adjusted, refinements) = self
                    .handle_contradictions(query, &texts, &hint, confidence)
                    .await;
                discrepancy = found;
                outcome = adjusted;
                followups = refinements;
            }
        }

        // Low merged confidence earns one refinement pass.
        if confidence < RESYNTHESIS_THRESHOLD && iteration < self.max_iterations() {
            iteration = 2;
            let mut enriched = vec![format!(
                "[Previous synthesis attempt (confidence: {:.2})]: {}\n\
                 Re-examine the findings and produce a more precise synthesis; \
                 flag areas of uncertainty clearly.",
                confidence, analysis.summary
            )];
            enriched.extend(texts.iter().cloned());

            match self.claude.synthesize(&enriched, query).await {
                Ok(second) => {
                    confidence = (confidence + 0.05).min(1.0);
                    if second.has_contradictions && discrepancy.is_none() {
                        if let Some(hint) = second.contradiction_hint.clone() {
                            let (found, adjusted, refinements) = self
                                .handle_contradictions(query, &texts, &hint, confidence)
                                .await;
                            discrepancy = found;
                            outcome = adjusted;
                            followups = refinements;
                        }
                    }
                    analysis = second;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "re-synthesis failed, keeping first pass");
                }
            }
        }

        Ok(InstrumentResult::new(outcome, analysis.summary, confidence)
            .with_findings(findings)
            .with_iterations(iteration)
            .with_sources(sources)
            .with_followups(followups)
            .apply_discrepancy(discrepancy))
    }
}

/// Local helper so the builder chain can keep an optional discrepancy.
trait ApplyDiscrepancy {
    fn apply_discrepancy(self, discrepancy: Option<String>) -> Self;
}

impl ApplyDiscrepancy for InstrumentResult {
    fn apply_discrepancy(mut self, discrepancy: Option<String>) -> Self {
        self.discrepancy = discrepancy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockReasoning;

    fn input(confidence: f64, findings: usize, source: &str) -> InstrumentResult {
        let findings = (0..findings)
            .map(|i| Finding::new(format!("fact {} from {}", i, source), None, confidence))
            .collect();
        InstrumentResult::new(Outcome::Complete, format!("summary {}", source), confidence)
            .with_findings(findings)
            .with_sources(vec![source.to_string()])
    }

    fn context_with(results: Vec<InstrumentResult>) -> TaskContext {
        let mut context = TaskContext::default();
        context.input_results = Some(results);
        context
    }

    #[test]
    fn test_no_input_results_is_bounded() {
        tokio_test::block_on(async {
            let synthesis = SynthesisInstrument::new(Arc::new(MockReasoning::answering("x")));
            let result = synthesis
                .execute("merge", &TaskContext::default())
                .await
                .unwrap();
            assert_eq!(result.outcome, Outcome::Bounded);
            assert!(!result.suggested_followups.is_empty());
        });
    }

    #[test]
    fn test_confidence_weighted_merge_with_agreement_bonus() {
        tokio_test::block_on(async {
            let synthesis = SynthesisInstrument::new(Arc::new(MockReasoning::answering("merged")));
            let context = context_with(vec![
                input(0.8, 3, "https://a.example"),
                input(0.9, 1, "https://b.example"),
            ]);

            let result = synthesis.execute("merge", &context).await.unwrap();
            assert_eq!(result.outcome, Outcome::Complete);
            assert_eq!(result.iterations, 1);
            // (0.8*3 + 0.9*1)/4 + 0.05 agreement = 0.875
            assert!((result.confidence - 0.875).abs() < 1e-9);
            assert_eq!(result.sources_consulted.len(), 2);
            assert_eq!(result.findings.len(), 4);
        });
    }

    #[test]
    fn test_low_confidence_triggers_resynthesis_pass() {
        tokio_test::block_on(async {
            let synthesis = SynthesisInstrument::new(Arc::new(MockReasoning::answering("merged")));
            let context = context_with(vec![input(0.4, 2, "https://a.example")]);

            let result = synthesis.execute("merge", &context).await.unwrap();
            assert_eq!(result.iterations, 2);
            assert!((result.confidence - 0.45).abs() < 1e-9);
        });
    }

    #[test]
    fn test_significant_contradiction_flags_discrepancy() {
        tokio_test::block_on(async {
            let reasoning = MockReasoning::answering("merged")
                .with_contradiction("branch answers disagree", Severity::Significant);
            let synthesis = SynthesisInstrument::new(Arc::new(reasoning));
            let context = context_with(vec![
                input(0.8, 2, "https://a.example"),
                input(0.85, 2, "https://b.example"),
            ]);

            let result = synthesis.execute("merge", &context).await.unwrap();
            assert_eq!(result.outcome, Outcome::Inconclusive);
            assert!(result.discrepancy.is_some());
        });
    }
}
