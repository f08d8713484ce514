//! Termination evaluation for iterative loops.
//!
//! Invoked each iteration with the loop's running state. Rules, in order:
//!
//! 1. confidence >= threshold            -> stop, complete
//! 2. stalled deltas and no new sources  -> stop, saturated
//! 3. iteration budget exhausted         -> stop, bounded
//! 4. unresolved contradiction           -> stop, inconclusive
//! 5. otherwise continue
//!
//! Rule 1 wins over rule 2 on the same iteration; rule 2 is checked
//! before rule 3 so a stalled final iteration classifies as saturated,
//! not bounded.

use serde::{Deserialize, Serialize};

use crate::types::{Finding, Outcome};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_DELTA_THRESHOLD: f64 = 0.02;
pub const DEFAULT_STALL_WINDOW: usize = 2;

/// Severity of a detected contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Significant,
}

/// Loop state handed to the evaluator each iteration.
#[derive(Debug)]
pub struct TerminationSignal<'a> {
    /// Current iteration number, 1-indexed.
    pub iteration: u32,
    pub max_iterations: u32,
    /// Confidence after each completed iteration, oldest first.
    pub confidence_history: &'a [f64],
    /// Sources first seen during this iteration.
    pub new_sources: usize,
    /// Unresolved contradiction, if one was detected.
    pub contradiction: Option<(&'a str, Severity)>,
}

/// Evaluator verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationDecision {
    pub stop: bool,
    pub outcome: Option<Outcome>,
    pub reason: String,
}

impl TerminationDecision {
    fn stop(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            stop: true,
            outcome: Some(outcome),
            reason: reason.into(),
        }
    }

    fn proceed() -> Self {
        Self {
            stop: false,
            outcome: None,
            reason: "continue".to_string(),
        }
    }
}

/// Decides, each iteration, whether to stop with an outcome or continue.
#[derive(Debug, Clone)]
pub struct TerminationEvaluator {
    pub confidence_threshold: f64,
    pub delta_threshold: f64,
    /// Number of trailing confidence deltas that must stall for rule 2.
    pub stall_window: usize,
    /// Contradictions at or above this severity trigger rule 4.
    pub severity_threshold: Severity,
}

impl Default for TerminationEvaluator {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            stall_window: DEFAULT_STALL_WINDOW,
            severity_threshold: Severity::Significant,
        }
    }
}

impl TerminationEvaluator {
    pub fn new(confidence_threshold: f64, delta_threshold: f64) -> Self {
        Self {
            confidence_threshold,
            delta_threshold,
            ..Self::default()
        }
    }

    pub fn evaluate(&self, signal: &TerminationSignal<'_>) -> TerminationDecision {
        // Rule 1: confidence reached the bar.
        if let Some(&current) = signal.confidence_history.last() {
            if current >= self.confidence_threshold {
                return TerminationDecision::stop(
                    Outcome::Complete,
                    format!("confidence {:.2} reached threshold", current),
                );
            }
        }

        // Rule 2: the last K deltas stalled and nothing new arrived.
        // Checked before the bounds rule so saturation wins the tie.
        if signal.new_sources == 0 && self.is_stalled(signal.confidence_history) {
            return TerminationDecision::stop(
                Outcome::Saturated,
                format!(
                    "confidence stalled across {} iterations with no new sources",
                    self.stall_window
                ),
            );
        }

        // Rule 3: iteration budget exhausted.
        if signal.iteration >= signal.max_iterations {
            return TerminationDecision::stop(
                Outcome::Bounded,
                format!("reached maximum iterations ({})", signal.max_iterations),
            );
        }

        // Rule 4: unresolved contradiction beyond the severity bar.
        if let Some((description, severity)) = signal.contradiction {
            if severity >= self.severity_threshold {
                return TerminationDecision::stop(
                    Outcome::Inconclusive,
                    format!("unresolved {:?} contradiction: {}", severity, description),
                );
            }
        }

        TerminationDecision::proceed()
    }

    fn is_stalled(&self, history: &[f64]) -> bool {
        if history.len() < self.stall_window + 1 {
            return false;
        }
        history
            .windows(2)
            .rev()
            .take(self.stall_window)
            .all(|pair| (pair[1] - pair[0]).abs() < self.delta_threshold)
    }

    /// Confidence heuristic over the accumulated findings.
    pub fn calculate_confidence(
        &self,
        findings: &[Finding],
        sources_count: usize,
        has_answer: bool,
    ) -> f64 {
        if findings.is_empty() {
            return 0.0;
        }

        let base = 0.3;
        let finding_boost = (findings.len() as f64 * 0.05).min(0.2);
        let source_boost = (sources_count as f64 * 0.04).min(0.2);
        let answer_boost = if has_answer { 0.2 } else { 0.0 };
        let avg_finding_confidence =
            findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64;

        (base + finding_boost + source_boost + answer_boost + avg_finding_confidence * 0.1).min(1.0)
    }
}
