//! Privacy classification for room routing.
//!
//! The classifier itself is an external collaborator; this module keeps
//! the narrow trait plus a keyword-heuristic default. Sensitive requests
//! are never delegated off-node.

use serde::{Deserialize, Serialize};

use symphony_core::types::TaskRequest;

/// Privacy level of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    Public,
    Internal,
    Sensitive,
}

/// Classifies a request before room selection.
pub trait PrivacyClassifier: Send + Sync {
    fn classify(&self, request: &TaskRequest) -> PrivacyLevel;
}

const SENSITIVE_KEYWORDS: [&str; 10] = [
    "password",
    "passport",
    "ssn",
    "social security",
    "medical",
    "diagnosis",
    "salary",
    "bank account",
    "credit card",
    "api key",
];

const INTERNAL_KEYWORDS: [&str; 5] = [
    "my calendar",
    "my email",
    "my notes",
    "my files",
    "my contacts",
];

/// Default keyword heuristic.
#[derive(Default)]
pub struct KeywordPrivacyClassifier;

impl KeywordPrivacyClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl PrivacyClassifier for KeywordPrivacyClassifier {
    fn classify(&self, request: &TaskRequest) -> PrivacyLevel {
        let mut haystack = request.query.to_ascii_lowercase();
        if let Some(context) = &request.context {
            if let Some(summary) = &context.conversation_summary {
                haystack.push(' ');
                haystack.push_str(&summary.to_ascii_lowercase());
            }
        }

        if SENSITIVE_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            PrivacyLevel::Sensitive
        } else if INTERNAL_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            PrivacyLevel::Internal
        } else {
            PrivacyLevel::Public
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_classification() {
        let classifier = KeywordPrivacyClassifier::new();

        let public = TaskRequest::new("best hiking trails near Portland");
        assert_eq!(classifier.classify(&public), PrivacyLevel::Public);

        let internal = TaskRequest::new("summarize my calendar for next week");
        assert_eq!(classifier.classify(&internal), PrivacyLevel::Internal);

        let sensitive = TaskRequest::new("is this credit card charge fraudulent?");
        assert_eq!(classifier.classify(&sensitive), PrivacyLevel::Sensitive);
    }
}
