//! Findings and per-instrument result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::{Outcome, ProcessType};

/// A single piece of evidence accumulated during a loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(content: impl Into<String>, source: Option<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }
    }
}

/// Terminal record produced by one instrument execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentResult {
    pub outcome: Outcome,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub summary: String,
    pub confidence: f64,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub sources_consulted: Vec<String>,
    #[serde(default)]
    pub discrepancy: Option<String>,
    #[serde(default)]
    pub suggested_followups: Vec<String>,
}

impl InstrumentResult {
    /// Create a result with no findings attached yet.
    pub fn new(outcome: Outcome, summary: impl Into<String>, confidence: f64) -> Self {
        Self {
            outcome,
            findings: Vec::new(),
            summary: summary.into(),
            confidence: confidence.clamp(0.0, 1.0),
            iterations: 0,
            sources_consulted: Vec::new(),
            discrepancy: None,
            suggested_followups: Vec::new(),
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources_consulted = sources;
        self
    }

    pub fn with_discrepancy(mut self, discrepancy: impl Into<String>) -> Self {
        self.discrepancy = Some(discrepancy.into());
        self
    }

    pub fn with_followups(mut self, followups: Vec<String>) -> Self {
        self.suggested_followups = followups;
        self
    }
}

/// One delegation failure observed while routing a task to a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub room_id: String,
    pub error: String,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl FailoverEvent {
    pub fn new(room_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            error: error.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Execution metadata attached to a terminal task response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub instrument_used: String,
    pub iterations: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub sources_consulted: Vec<String>,
    pub process_type: ProcessType,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub failover_events: Vec<FailoverEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_confidence_is_clamped() {
        assert_eq!(Finding::new("a", None, 1.4).confidence, 1.0);
        assert_eq!(Finding::new("b", None, -0.1).confidence, 0.0);
    }

    #[test]
    fn test_instrument_result_builders() {
        let result = InstrumentResult::new(Outcome::Complete, "done", 0.9)
            .with_iterations(3)
            .with_sources(vec!["https://example.com".to_string()])
            .with_discrepancy("conflicting dates");
        assert_eq!(result.iterations, 3);
        assert_eq!(result.sources_consulted.len(), 1);
        assert_eq!(result.discrepancy.as_deref(), Some("conflicting dates"));
    }
}
