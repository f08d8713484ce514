//! Tool abstraction and capability negotiation.
//!
//! Tools are capability-bearing external clients (LLM, web search). The
//! set of tool interfaces is closed: reasoning tools and search tools,
//! registered as a tagged `ToolHandle` so the registry can resolve a
//! capability string to the right kind of client.

mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::{ResolvedTools, ToolRegistry};

use crate::termination::Severity;

/// Well-known capability strings negotiated between instruments and tools.
pub mod capability {
    pub const REASONING: &str = "reasoning";
    pub const WEB_SEARCH: &str = "web_search";
    pub const VISION: &str = "vision";
    pub const SYNTHESIS: &str = "synthesis";
}

/// Tool call failures.
///
/// Transient kinds are retried by the tool's own policy; on exhaustion
/// the calling iteration records a low-confidence synthetic finding and
/// the loop continues.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("http error: {0}")]
    Http(String),

    #[error("malformed response: {0}")]
    Response(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("tool unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout(_) | ToolError::Http(_))
    }

    /// Stable classification label for the error-learning store.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Timeout(_) => "timeout",
            ToolError::Http(_) => "http",
            ToolError::Response(_) => "response",
            ToolError::Serialization(_) => "serialization",
            ToolError::Unavailable(_) => "unavailable",
        }
    }
}

/// Base metadata every tool exposes.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn capabilities(&self) -> &[&'static str];

    async fn health_check(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Synthesis verdict returned by a reasoning tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisAnalysis {
    pub summary: String,
    pub has_contradictions: bool,
    #[serde(default)]
    pub contradiction_hint: Option<String>,
}

/// In-depth contradiction analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscrepancyAnalysis {
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub suggested_refinements: Vec<String>,
}

/// One web search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

/// Search response; `answer` is the engine's direct answer if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// An LLM-backed tool covering reasoning, synthesis and vision.
#[async_trait]
pub trait ReasoningTool: Tool + std::fmt::Debug {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, ToolError>;

    /// Merge findings into a summary and flag contradictions.
    async fn synthesize(
        &self,
        findings: &[String],
        query: &str,
    ) -> Result<SynthesisAnalysis, ToolError>;

    /// Analyze a flagged contradiction in depth.
    async fn analyze_discrepancy(
        &self,
        findings: &[String],
        query: &str,
        hint: &str,
    ) -> Result<DiscrepancyAnalysis, ToolError>;

    /// Describe image attachments (data URLs or fetchable URLs).
    async fn describe_images(
        &self,
        prompt: &str,
        images: &[String],
    ) -> Result<String, ToolError>;
}

/// A web-search-backed tool.
#[async_trait]
pub trait SearchTool: Tool + std::fmt::Debug {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResults, ToolError>;
}

/// Tagged tool variant stored by the registry.
#[derive(Debug, Clone)]
pub enum ToolHandle {
    Reasoning(Arc<dyn ReasoningTool>),
    Search(Arc<dyn SearchTool>),
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        match self {
            ToolHandle::Reasoning(tool) => tool.name(),
            ToolHandle::Search(tool) => tool.name(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            ToolHandle::Reasoning(tool) => tool.version(),
            ToolHandle::Search(tool) => tool.version(),
        }
    }

    pub fn capabilities(&self) -> &[&'static str] {
        match self {
            ToolHandle::Reasoning(tool) => tool.capabilities(),
            ToolHandle::Search(tool) => tool.capabilities(),
        }
    }

    pub fn satisfies(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|cap| *cap == capability)
    }

    pub async fn health_check(&self) -> Result<(), ToolError> {
        match self {
            ToolHandle::Reasoning(tool) => tool.health_check().await,
            ToolHandle::Search(tool) => tool.health_check().await,
        }
    }

    pub fn as_reasoning(&self) -> Option<Arc<dyn ReasoningTool>> {
        match self {
            ToolHandle::Reasoning(tool) => Some(tool.clone()),
            ToolHandle::Search(_) => None,
        }
    }

    pub fn as_search(&self) -> Option<Arc<dyn SearchTool>> {
        match self {
            ToolHandle::Search(tool) => Some(tool.clone()),
            ToolHandle::Reasoning(_) => None,
        }
    }
}
