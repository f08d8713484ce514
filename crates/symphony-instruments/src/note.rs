//! Note instrument - atomic, single-cycle execution.

use std::sync::Arc;

use async_trait::async_trait;

use symphony_core::error::InstrumentError;
use symphony_core::instrument::Instrument;
use symphony_core::tool::{capability, ReasoningTool};
use symphony_core::types::{Finding, InstrumentResult, Outcome, ProcessType, TaskContext};

const REQUIRED_CAPABILITIES: [&str; 1] = [capability::REASONING];

/// Confidence below this bar classifies the answer as bounded.
const COMPLETE_CONFIDENCE_FLOOR: f64 = 0.7;

/// Markers that the model hedged instead of answering.
const HEDGE_MARKERS: [&str; 4] = [
    "i'm not sure",
    "i am not sure",
    "i don't know",
    "i cannot",
];

/// Single reasoning call, no iteration, no web search.
///
/// Use case: simple questions, quick answers, general knowledge.
#[derive(Debug)]
pub struct NoteInstrument {
    claude: Arc<dyn ReasoningTool>,
}

impl NoteInstrument {
    pub fn new(claude: Arc<dyn ReasoningTool>) -> Self {
        Self { claude }
    }

    fn build_system_prompt(context: &TaskContext) -> String {
        let mut system = String::from(
            "You are a helpful assistant that provides clear, accurate and concise answers. \
             Be direct and informative. If you're unsure about something, say so.",
        );
        if let Some(summary) = &context.conversation_summary {
            system.push_str("\n\nConversation context: ");
            system.push_str(summary);
        }
        system
    }

    fn build_prompt(query: &str, context: &TaskContext) -> String {
        let mut additions = Vec::new();
        if let Some(location) = &context.location {
            additions.push(format!("User location: {}", location));
        }
        if !context.attachments.is_empty() {
            additions.push(format!("Attachments: {} provided", context.attachments.len()));
        }
        if additions.is_empty() {
            query.to_string()
        } else {
            format!("{}\n\n[Context: {}]", query, additions.join("; "))
        }
    }

    fn estimate_confidence(response: &str) -> f64 {
        let lower = response.to_ascii_lowercase();
        if HEDGE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            0.5
        } else {
            0.9
        }
    }
}

#[async_trait]
impl Instrument for NoteInstrument {
    fn name(&self) -> &str {
        "note"
    }

    fn max_iterations(&self) -> u32 {
        1
    }

    fn process_type(&self) -> ProcessType {
        ProcessType::Autonomic
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
        tracing::debug!(instrument = "note", "executing single-cycle query");

        let system = Self::build_system_prompt(context);
        let prompt = Self::build_prompt(query, context);

        let response = match self.claude.complete(&prompt, Some(&system)).await {
            Ok(response) => response,
            Err(err) => {
                // One cycle, one tool; exhaustion collapses to bounded.
                tracing::warn!(error = %err, "note completion failed");
                let finding =
                    Finding::new(format!("completion failed: {}", err), None, 0.1);
                return Ok(InstrumentResult::new(
                    Outcome::Bounded,
                    format!("Unable to answer: {}", err),
                    0.1,
                )
                .with_findings(vec![finding])
                .with_iterations(1));
            }
        };

        let confidence = Self::estimate_confidence(&response);
        let outcome = if confidence >= COMPLETE_CONFIDENCE_FLOOR {
            Outcome::Complete
        } else {
            Outcome::Bounded
        };
        let source = self.claude.name().to_string();
        let finding = Finding::new(response.clone(), Some(source.clone()), confidence);

        Ok(InstrumentResult::new(outcome, response, confidence)
            .with_findings(vec![finding])
            .with_iterations(1)
            .with_sources(vec![source]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockReasoning;

    #[test]
    fn test_confident_answer_is_complete() {
        tokio_test::block_on(async {
            let note = NoteInstrument::new(Arc::new(MockReasoning::answering(
                "Paris is the capital of France.",
            )));
            let result = note
                .execute("capital of France?", &TaskContext::default())
                .await
                .unwrap();

            assert_eq!(result.outcome, Outcome::Complete);
            assert_eq!(result.iterations, 1);
            assert_eq!(result.findings.len(), 1);
            assert!(result.confidence >= 0.7);
        });
    }

    #[test]
    fn test_hedged_answer_is_bounded() {
        tokio_test::block_on(async {
            let note = NoteInstrument::new(Arc::new(MockReasoning::answering(
                "I'm not sure, this depends on many factors.",
            )));
            let result = note
                .execute("will it rain next month?", &TaskContext::default())
                .await
                .unwrap();

            assert_eq!(result.outcome, Outcome::Bounded);
            assert!(result.confidence < 0.7);
        });
    }

    #[test]
    fn test_tool_failure_collapses_to_bounded() {
        tokio_test::block_on(async {
            let note = NoteInstrument::new(Arc::new(MockReasoning::failing()));
            let result = note
                .execute("anything", &TaskContext::default())
                .await
                .unwrap();

            assert_eq!(result.outcome, Outcome::Bounded);
            assert_eq!(result.findings.len(), 1);
        });
    }

    #[test]
    fn test_cancelled_context_short_circuits() {
        tokio_test::block_on(async {
            let note = NoteInstrument::new(Arc::new(MockReasoning::answering("yes")));
            let context = TaskContext::default();
            context.cancellation.cancel();

            let err = note.execute("anything", &context).await.unwrap_err();
            assert!(matches!(err, InstrumentError::Cancelled));
        });
    }
}
