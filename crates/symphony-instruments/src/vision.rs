//! Vision instrument - bounded image analysis.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::{effective_max_iterations, Instrument};
use symphony_core::tool::{capability, ReasoningTool};
use symphony_core::types::{
    CheckpointRecord, Finding, InstrumentResult, Outcome, ProcessType, TaskContext,
};

const REQUIRED_CAPABILITIES: [&str; 2] = [capability::REASONING, capability::VISION];

pub const DEFAULT_VISION_MAX_ITERATIONS: u32 = 3;

/// Confidence at which the analysis is considered final.
const VISION_CONFIDENCE_TARGET: f64 = 0.8;

const IMAGE_INDICATORS: [&str; 6] = [
    "data:image/",
    ".jpg",
    ".jpeg",
    ".png",
    ".gif",
    ".webp",
];

fn looks_like_image(attachment: &str) -> bool {
    let lower = attachment.to_ascii_lowercase();
    let without_query = lower.split('?').next().unwrap_or("");
    IMAGE_INDICATORS
        .iter()
        .any(|indicator| without_query.contains(indicator))
        || lower.starts_with("https://")
}

/// Consumes image attachments (base64 data URLs or fetchable URLs) and
/// iteratively refines the analysis, up to three passes.
#[derive(Debug)]
pub struct VisionInstrument {
    claude: Arc<dyn ReasoningTool>,
    max_iterations: u32,
}

impl VisionInstrument {
    pub fn new(claude: Arc<dyn ReasoningTool>) -> Self {
        Self {
            claude,
            max_iterations: DEFAULT_VISION_MAX_ITERATIONS,
        }
    }

    fn estimate_confidence(description: &str, iteration: u32) -> f64 {
        let lower = description.to_ascii_lowercase();
        let hedged = lower.contains("unclear")
            || lower.contains("cannot tell")
            || lower.contains("hard to see");
        let base = if hedged { 0.45 } else { 0.7 };
        (base + 0.1 * (iteration.saturating_sub(1)) as f64).min(0.95)
    }
}

#[async_trait]
impl Instrument for VisionInstrument {
    fn name(&self) -> &str {
        "vision"
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

    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
    ) -> Result<InstrumentResult, InstrumentError> {
        let images: Vec<String> = context
            .attachments
            .iter()
            .filter(|att| looks_like_image(att))
            .cloned()
            .collect();

        // No parsable image: exit immediately, no tool calls.
        if images.is_empty() {
            return Ok(InstrumentResult::new(
                Outcome::Bounded,
                format!(
                    "Vision requires an image attachment; none of the {} attachment(s) \
                     look like an image (expected a data:image/ URL or an image URL).",
                    context.attachments.len()
                ),
                0.0,
            ));
        }

        let max_iterations = effective_max_iterations(self, context).max(1);
        let mut findings: Vec<Finding> = Vec::new();
        let mut description = String::new();
        let mut confidence = 0.0;
        let mut iteration = 0u32;
        let mut outcome = Outcome::Bounded;

        loop {
            tokio::task::yield_now().await;
            if context.is_cancelled() {
                return Err(InstrumentError::Cancelled);
            }

            iteration += 1;
            let iteration_start = Instant::now();

            let prompt = if iteration == 1 {
                format!(
                    "Analyze the attached image(s) and answer: {}\n\
                     Describe what is relevant to the question.",
                    query
                )
            } else {
                format!(
                    "Previous analysis: {}\n\nRefine the analysis of the attached image(s) \
                     for the question: {}. Resolve anything marked unclear.",
                    description, query
                )
            };

            match self.claude.describe_images(&prompt, &images).await {
                Ok(next) => {
                    confidence = Self::estimate_confidence(&next, iteration);
                    description = next;
                    findings.push(Finding::new(
                        description.clone(),
                        Some(self.claude.name().to_string()),
                        confidence,
                    ));
                }
                Err(err) => {
                    tracing::warn!(error = %err, iteration, "vision analysis failed");
                    findings.push(Finding::new(
                        format!("image analysis failed: {}", err),
                        None,
                        0.1,
                    ));
                }
            }

            context
                .emit_checkpoint(CheckpointRecord::new(
                    iteration,
                    "analysis",
                    json!({ "images": images.len() }),
                    json!({ "confidence": confidence }),
                    iteration_start.elapsed().as_millis() as u64,
                ))
                .await;

            if confidence >= VISION_CONFIDENCE_TARGET {
                outcome = Outcome::Complete;
                break;
            }
            if iteration >= max_iterations {
                outcome = if confidence >= 0.7 {
                    Outcome::Complete
                } else {
                    Outcome::Bounded
                };
                break;
            }
        }

        let summary = if description.is_empty() {
            "Image analysis produced no usable description.".to_string()
        } else {
            description
        };

        Ok(InstrumentResult::new(outcome, summary, confidence)
            .with_findings(findings)
            .with_iterations(iteration)
            .with_sources(vec![self.claude.name().to_string()]))
    }
}
