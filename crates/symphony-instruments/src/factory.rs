//! Instrument factory - binds instruments to registry tools.
//!
//! The closed instrument set (note, research, vision, synthesis) plus
//! dynamically registered loop specs, built against capability bindings
//! resolved from the tool registry in fixed order.

use std::collections::HashMap;
use std::sync::Arc;

use symphony_core::error::CapabilityError;
use symphony_core::instrument::Instrument;
use symphony_core::tool::{capability, ToolRegistry};

use crate::loop_spec::{LoopInstrument, LoopSpec};
use crate::note::NoteInstrument;
use crate::research::ResearchInstrument;
use crate::synthesis::SynthesisInstrument;
use crate::vision::VisionInstrument;

/// Builds instruments with tools injected at construction.
pub struct InstrumentFactory {
    registry: Arc<ToolRegistry>,
}

impl InstrumentFactory {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Build the baseline instrument table.
    ///
    /// Fails with `CapabilityError` when any required capability is
    /// unsatisfied; no task runs against a partially-built table.
    pub fn build_baseline(
        &self,
    ) -> Result<HashMap<String, Arc<dyn Instrument>>, CapabilityError> {
        let mut instruments: HashMap<String, Arc<dyn Instrument>> = HashMap::new();

        let note = self.registry.resolve(&[capability::REASONING], &[])?;
        instruments.insert(
            "note".to_string(),
            Arc::new(NoteInstrument::new(note.reasoning(capability::REASONING)?)),
        );

        let research = self.registry.resolve(
            &[capability::REASONING, capability::WEB_SEARCH],
            &[capability::SYNTHESIS],
        )?;
        instruments.insert(
            "research".to_string(),
            Arc::new(ResearchInstrument::new(
                research.reasoning(capability::REASONING)?,
                research.search(capability::WEB_SEARCH)?,
            )),
        );

        let vision = self
            .registry
            .resolve(&[capability::REASONING, capability::VISION], &[])?;
        instruments.insert(
            "vision".to_string(),
            Arc::new(VisionInstrument::new(vision.reasoning(capability::REASONING)?)),
        );

        let synthesis = self
            .registry
            .resolve(&[capability::REASONING, capability::SYNTHESIS], &[])?;
        instruments.insert(
            "synthesis".to_string(),
            Arc::new(SynthesisInstrument::new(
                synthesis.reasoning(capability::REASONING)?,
            )),
        );

        Ok(instruments)
    }

    /// Build a dynamic loop instrument from a spec.
    pub fn build_loop(&self, spec: LoopSpec) -> Result<Arc<dyn Instrument>, CapabilityError> {
        let resolved = self.registry.resolve(&[capability::REASONING], &[])?;
        let claude = resolved.reasoning(capability::REASONING)?;
        let instrument = LoopInstrument::new(spec, claude)
            .map_err(|errors| CapabilityError::Unsatisfied(errors.join("; ")))?;
        Ok(Arc::new(instrument))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockReasoning, MockSearch};

    #[test]
    fn test_baseline_build_requires_both_tool_kinds() {
        let mut registry = ToolRegistry::new();
        registry.register_reasoning(Arc::new(MockReasoning::answering("x")));

        let factory = InstrumentFactory::new(Arc::new(registry));
        let err = factory.build_baseline().expect_err("web_search missing");
        assert_eq!(
            err,
            CapabilityError::Unsatisfied(capability::WEB_SEARCH.to_string())
        );
    }

    #[test]
    fn test_baseline_build_produces_closed_set() {
        let mut registry = ToolRegistry::new();
        registry.register_reasoning(Arc::new(MockReasoning::answering("x")));
        registry.register_search(Arc::new(MockSearch::with_hits(vec![])));

        let factory = InstrumentFactory::new(Arc::new(registry));
        let instruments = factory.build_baseline().unwrap();

        let mut names: Vec<&str> = instruments.keys().map(String::as_str).collect();
        names.sort();
        assert_eq!(names, vec!["note", "research", "synthesis", "vision"]);
    }
}
