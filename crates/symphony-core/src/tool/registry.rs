//! Tool registry keyed by capability strings.
//!
//! Registration order is the resolution priority: the first registered
//! tool satisfying a capability wins. Implementers register in fixed
//! order so resolution is deterministic across restarts. The registry is
//! read-only after initialization; tool instances are shared and must be
//! concurrency-safe.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CapabilityError;

use super::{ReasoningTool, SearchTool, ToolError, ToolHandle};

/// Maps capability strings to tool instances.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolHandle>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: ToolHandle) {
        self.tools.push(tool);
    }

    pub fn register_reasoning(&mut self, tool: Arc<dyn ReasoningTool>) {
        self.register(ToolHandle::Reasoning(tool));
    }

    pub fn register_search(&mut self, tool: Arc<dyn SearchTool>) {
        self.register(ToolHandle::Search(tool));
    }

    /// All tools satisfying a capability, in registration order.
    pub fn get_by_capability(&self, capability: &str) -> Vec<ToolHandle> {
        self.tools
            .iter()
            .filter(|tool| tool.satisfies(capability))
            .cloned()
            .collect()
    }

    /// All registered tool names, in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Resolve required and optional capability sets.
    ///
    /// Each required capability must resolve to exactly one tool (first
    /// registered wins); an unsatisfied required capability fails the
    /// whole resolution. Optional capabilities are best-effort.
    pub fn resolve(
        &self,
        required: &[&str],
        optional: &[&str],
    ) -> Result<ResolvedTools, CapabilityError> {
        let mut bindings = BTreeMap::new();

        for capability in required {
            let tool = self
                .tools
                .iter()
                .find(|tool| tool.satisfies(capability))
                .ok_or_else(|| CapabilityError::Unsatisfied(capability.to_string()))?;
            bindings.insert(capability.to_string(), tool.clone());
        }

        for capability in optional {
            if let Some(tool) = self.tools.iter().find(|tool| tool.satisfies(capability)) {
                bindings.insert(capability.to_string(), tool.clone());
            }
        }

        Ok(ResolvedTools { bindings })
    }

    /// Health status for every registered tool.
    pub async fn health_check_all(&self) -> BTreeMap<String, Result<(), ToolError>> {
        let mut statuses = BTreeMap::new();
        for tool in &self.tools {
            statuses.insert(tool.name().to_string(), tool.health_check().await);
        }
        statuses
    }
}

/// Capability-to-tool bindings produced by a resolution.
#[derive(Debug, Clone)]
pub struct ResolvedTools {
    bindings: BTreeMap<String, ToolHandle>,
}

impl ResolvedTools {
    pub fn get(&self, capability: &str) -> Option<&ToolHandle> {
        self.bindings.get(capability)
    }

    /// Typed access to a reasoning binding.
    pub fn reasoning(&self, capability: &str) -> Result<Arc<dyn ReasoningTool>, CapabilityError> {
        let tool = self
            .bindings
            .get(capability)
            .ok_or_else(|| CapabilityError::Unsatisfied(capability.to_string()))?;
        tool.as_reasoning()
            .ok_or_else(|| CapabilityError::WrongKind(capability.to_string()))
    }

    /// Typed access to a search binding.
    pub fn search(&self, capability: &str) -> Result<Arc<dyn SearchTool>, CapabilityError> {
        let tool = self
            .bindings
            .get(capability)
            .ok_or_else(|| CapabilityError::Unsatisfied(capability.to_string()))?;
        tool.as_search()
            .ok_or_else(|| CapabilityError::WrongKind(capability.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{capability, SearchResults, Tool};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FakeSearch {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1"
        }

        fn capabilities(&self) -> &[&'static str] {
            &[capability::WEB_SEARCH]
        }
    }

    #[async_trait]
    impl SearchTool for FakeSearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<SearchResults, ToolError> {
            Ok(SearchResults::default())
        }
    }

    #[test]
    fn test_resolution_prefers_first_registered() {
        let mut registry = ToolRegistry::new();
        registry.register_search(Arc::new(FakeSearch { name: "alpha" }));
        registry.register_search(Arc::new(FakeSearch { name: "beta" }));

        let resolved = registry.resolve(&[capability::WEB_SEARCH], &[]).unwrap();
        assert_eq!(
            resolved.get(capability::WEB_SEARCH).unwrap().name(),
            "alpha"
        );
        assert_eq!(registry.get_by_capability(capability::WEB_SEARCH).len(), 2);
    }

    #[test]
    fn test_unsatisfied_required_capability_fails() {
        let registry = ToolRegistry::new();
        let err = registry
            .resolve(&[capability::REASONING], &[])
            .expect_err("must fail");
        assert_eq!(
            err,
            CapabilityError::Unsatisfied(capability::REASONING.to_string())
        );
    }

    #[test]
    fn test_optional_capabilities_are_best_effort() {
        let mut registry = ToolRegistry::new();
        registry.register_search(Arc::new(FakeSearch { name: "alpha" }));

        let resolved = registry
            .resolve(&[capability::WEB_SEARCH], &[capability::REASONING])
            .unwrap();
        assert!(resolved.get(capability::REASONING).is_none());
    }

    #[test]
    fn test_typed_accessor_rejects_wrong_kind() {
        let mut registry = ToolRegistry::new();
        registry.register_search(Arc::new(FakeSearch { name: "alpha" }));

        let resolved = registry.resolve(&[capability::WEB_SEARCH], &[]).unwrap();
        let err = resolved
            .reasoning(capability::WEB_SEARCH)
            .expect_err("wrong kind");
        assert_eq!(
            err,
            CapabilityError::WrongKind(capability::WEB_SEARCH.to_string())
        );
    }
}
