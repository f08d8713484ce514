//! # Symphony Instruments
//!
//! Baseline instruments and the factory that binds them to tools:
//! - Note: atomic single-cycle answers
//! - Research: iterative scientific-method web research
//! - Vision: bounded image analysis
//! - Synthesis: confidence-weighted merging of upstream results
//! - Loop: dynamically registered phase-based loop specifications
//!
//! Instruments depend on the `TaskContext` shape only; recursion back
//! into the conductor goes through the injected `spawn_fn`.

mod factory;
mod loop_spec;
mod note;
mod research;
mod synthesis;
mod vision;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::InstrumentFactory;
pub use loop_spec::{LoopInstrument, LoopPhase, LoopSpec, LoopSpecValidation};
pub use note::NoteInstrument;
pub use research::ResearchInstrument;
pub use synthesis::SynthesisInstrument;
pub use vision::VisionInstrument;
