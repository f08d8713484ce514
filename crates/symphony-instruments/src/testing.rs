//! Shared scripted tool doubles for instrument tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use symphony_core::termination::Severity;
use symphony_core::tool::{
    capability, DiscrepancyAnalysis, ReasoningTool, SearchHit, SearchResults, SearchTool,
    SynthesisAnalysis, Tool, ToolError,
};

const REASONING_CAPS: [&str; 3] = [
    capability::REASONING,
    capability::VISION,
    capability::SYNTHESIS,
];
const SEARCH_CAPS: [&str; 1] = [capability::WEB_SEARCH];

/// Scripted reasoning tool.
#[derive(Debug)]
pub(crate) struct MockReasoning {
    pub completions: Mutex<Vec<String>>,
    pub synthesis: Mutex<Vec<SynthesisAnalysis>>,
    pub discrepancy: Option<DiscrepancyAnalysis>,
    pub complete_calls: AtomicUsize,
    pub fail_completions: bool,
}

impl MockReasoning {
    pub fn answering(answer: &str) -> Self {
        Self {
            completions: Mutex::new(vec![answer.to_string()]),
            synthesis: Mutex::new(vec![SynthesisAnalysis {
                summary: answer.to_string(),
                has_contradictions: false,
                contradiction_hint: None,
            }]),
            discrepancy: None,
            complete_calls: AtomicUsize::new(0),
            fail_completions: false,
        }
    }

    pub fn failing() -> Self {
        let mut mock = Self::answering("unused");
        mock.fail_completions = true;
        mock
    }

    pub fn with_contradiction(mut self, hint: &str, severity: Severity) -> Self {
        self.synthesis = Mutex::new(vec![SynthesisAnalysis {
            summary: "conflicting evidence".to_string(),
            has_contradictions: true,
            contradiction_hint: Some(hint.to_string()),
        }]);
        self.discrepancy = Some(DiscrepancyAnalysis {
            description: format!("analyzed: {}", hint),
            severity,
            suggested_refinements: vec!["narrow the time range".to_string()],
        });
        self
    }

    fn next_completion(&self) -> Result<String, ToolError> {
        if self.fail_completions {
            return Err(ToolError::Timeout(5));
        }
        let mut completions = self.completions.lock().unwrap();
        let next = if completions.len() > 1 {
            completions.remove(0)
        } else {
            completions[0].clone()
        };
        Ok(next)
    }
}

#[async_trait]
impl Tool for MockReasoning {
    fn name(&self) -> &str {
        "mock-reasoning"
    }

    fn version(&self) -> &str {
        "test"
    }

    fn capabilities(&self) -> &[&'static str] {
        &REASONING_CAPS
    }
}

#[async_trait]
impl ReasoningTool for MockReasoning {
    async fn complete(&self, _prompt: &str, _system: Option<&str>) -> Result<String, ToolError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.next_completion()
    }

    async fn synthesize(
        &self,
        _findings: &[String],
        _query: &str,
    ) -> Result<SynthesisAnalysis, ToolError> {
        if self.fail_completions {
            return Err(ToolError::Timeout(5));
        }
        let mut synthesis = self.synthesis.lock().unwrap();
        let next = if synthesis.len() > 1 {
            synthesis.remove(0)
        } else {
            synthesis[0].clone()
        };
        Ok(next)
    }

    async fn analyze_discrepancy(
        &self,
        _findings: &[String],
        _query: &str,
        _hint: &str,
    ) -> Result<DiscrepancyAnalysis, ToolError> {
        self.discrepancy
            .clone()
            .ok_or_else(|| ToolError::Response("no discrepancy scripted".to_string()))
    }

    async fn describe_images(
        &self,
        _prompt: &str,
        _images: &[String],
    ) -> Result<String, ToolError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.next_completion()
    }
}

/// Scripted search tool; returns `per_call` result sets in order, then
/// empty results.
#[derive(Debug)]
pub(crate) struct MockSearch {
    pub per_call: Mutex<Vec<SearchResults>>,
    pub search_calls: AtomicUsize,
    pub fail_searches: bool,
}

impl MockSearch {
    pub fn with_hits(hit_batches: Vec<Vec<(&str, f64)>>) -> Self {
        let per_call = hit_batches
            .into_iter()
            .map(|batch| SearchResults {
                answer: None,
                results: batch
                    .into_iter()
                    .map(|(url, score)| SearchHit {
                        title: format!("hit {}", url),
                        url: url.to_string(),
                        content: format!("content from {}", url),
                        score,
                    })
                    .collect(),
            })
            .collect();
        Self {
            per_call: Mutex::new(per_call),
            search_calls: AtomicUsize::new(0),
            fail_searches: false,
        }
    }

    pub fn failing() -> Self {
        let mut mock = Self::with_hits(vec![]);
        mock.fail_searches = true;
        mock
    }
}

#[async_trait]
impl Tool for MockSearch {
    fn name(&self) -> &str {
        "mock-search"
    }

    fn version(&self) -> &str {
        "test"
    }

    fn capabilities(&self) -> &[&'static str] {
        &SEARCH_CAPS
    }
}

#[async_trait]
impl SearchTool for MockSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<SearchResults, ToolError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_searches {
            return Err(ToolError::Timeout(5));
        }
        let mut per_call = self.per_call.lock().unwrap();
        if per_call.is_empty() {
            return Ok(SearchResults::default());
        }
        Ok(per_call.remove(0))
    }
}
