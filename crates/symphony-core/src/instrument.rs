//! Instrument abstraction.
//!
//! An instrument is a self-contained loop: one or more iterations
//! producing findings, self-evaluating termination. Instruments are
//! black boxes to the conductor; they depend on the `TaskContext` shape
//! only and never on the conductor type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InstrumentError;
use crate::types::{InstrumentResult, ProcessType, TaskContext};

/// Per-execution overrides applied by compositions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub confidence_delta_threshold: Option<f64>,
}

impl InstrumentConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }
}

/// The core execution unit.
///
/// Instruments are shared (`Arc<dyn Instrument>`) and must be
/// concurrency-safe. Between iterations every instrument yields and
/// checks `context.cancellation`.
#[async_trait]
pub trait Instrument: Send + Sync + std::fmt::Debug {
    /// Unique instrument name used for routing and compositions.
    fn name(&self) -> &str;

    /// Default iteration budget; `context.config_override` can tighten it.
    fn max_iterations(&self) -> u32;

    /// Observability classification for this instrument.
    fn process_type(&self) -> ProcessType;

    /// Capabilities that must resolve for this instrument to exist.
    fn required_capabilities(&self) -> &[&'static str];

    /// Best-effort capabilities.
    fn optional_capabilities(&self) -> &[&'static str] {
        &[]
    }

    /// Run the loop to a terminal outcome.
    async fn execute(
        &self,
        query: &str,
        context: &TaskContext,
    ) -> Result<InstrumentResult, InstrumentError>;
}

/// Effective iteration budget after applying a per-step override.
pub fn effective_max_iterations(instrument: &dyn Instrument, context: &TaskContext) -> u32 {
    context
        .config_override
        .as_ref()
        .and_then(|config| config.max_iterations)
        .unwrap_or_else(|| instrument.max_iterations())
}
