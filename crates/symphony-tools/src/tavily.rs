//! Tavily-backed web search tool.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use symphony_core::tool::{capability, SearchHit, SearchResults, SearchTool, Tool, ToolError};

use crate::retry::RetryPolicy;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CAPABILITIES: [&str; 1] = [capability::WEB_SEARCH];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Tavily search client.
#[derive(Debug)]
pub struct TavilySearch {
    config: TavilyConfig,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: TavilyConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn from_api_key(api_key: Option<String>) -> Self {
        Self::new(TavilyConfig {
            api_key,
            ..TavilyConfig::default()
        })
    }

    fn api_key(&self) -> Result<&str, ToolError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("TAVILY_API_KEY is not configured".to_string()))
    }
}

#[async_trait]
impl Tool for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    fn version(&self) -> &str {
        "v1"
    }

    fn capabilities(&self) -> &[&'static str] {
        &CAPABILITIES
    }

    async fn health_check(&self) -> Result<(), ToolError> {
        self.api_key().map(|_| ())
    }
}

#[async_trait]
impl SearchTool for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResults, ToolError> {
        let api_key = self.api_key()?.to_string();
        let payload = json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": true,
        });

        self.config
            .retry
            .run("tavily", || {
                let payload = payload.clone();
                async move {
                    let response = self
                        .http
                        .post(TAVILY_API_URL)
                        .json(&payload)
                        .send()
                        .await
                        .map_err(|e| {
                            if e.is_timeout() {
                                ToolError::Timeout(self.config.timeout.as_millis() as u64)
                            } else {
                                ToolError::Http(e.to_string())
                            }
                        })?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ToolError::Http(format!("{}: {}", status, body)));
                    }

                    let parsed: TavilyResponse = response
                        .json()
                        .await
                        .map_err(|e| ToolError::Response(e.to_string()))?;
                    Ok(parsed.into_results())
                }
            })
            .await
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl TavilyResponse {
    fn into_results(self) -> SearchResults {
        SearchResults {
            answer: self.answer,
            results: self
                .results
                .into_iter()
                .map(|hit| SearchHit {
                    title: hit.title,
                    url: hit.url,
                    content: hit.content,
                    score: hit.score,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_mapping() {
        let raw = json!({
            "answer": "42",
            "results": [
                {"title": "t", "url": "https://example.com", "content": "c", "score": 0.9}
            ]
        });
        let parsed: TavilyResponse = serde_json::from_value(raw).unwrap();
        let results = parsed.into_results();
        assert_eq!(results.answer.as_deref(), Some("42"));
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].url, "https://example.com");
    }

    #[test]
    fn test_search_without_key_is_unavailable() {
        tokio_test::block_on(async {
            let tool = TavilySearch::from_api_key(None);
            let err = tool.search("anything", 3).await.unwrap_err();
            assert!(matches!(err, ToolError::Unavailable(_)));
        });
    }
}
