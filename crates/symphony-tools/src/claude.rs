//! Anthropic-backed reasoning tool.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use symphony_core::termination::Severity;
use symphony_core::tool::{
    capability, DiscrepancyAnalysis, ReasoningTool, SynthesisAnalysis, Tool, ToolError,
};

use crate::retry::RetryPolicy;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const CAPABILITIES: [&str; 3] = [
    capability::REASONING,
    capability::VISION,
    capability::SYNTHESIS,
];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Anthropic messages-API client exposing reasoning, synthesis and
/// vision capabilities.
#[derive(Debug)]
pub struct ClaudeTool {
    config: ClaudeConfig,
    http: reqwest::Client,
}

impl ClaudeTool {
    pub fn new(config: ClaudeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn from_api_key(api_key: Option<String>) -> Self {
        Self::new(ClaudeConfig {
            api_key,
            ..ClaudeConfig::default()
        })
    }

    fn api_key(&self) -> Result<&str, ToolError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("CLAUDE_API_KEY is not configured".to_string()))
    }

    async fn send(&self, system: Option<&str>, content: Value) -> Result<String, ToolError> {
        let api_key = self.api_key()?.to_string();
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": content}],
        });
        if let Some(system) = system {
            payload["system"] = Value::String(system.to_string());
        }

        self.config
            .retry
            .run("claude", || {
                let payload = payload.clone();
                let api_key = api_key.clone();
                async move {
                    let response = self
                        .http
                        .post(ANTHROPIC_API_URL)
                        .header("x-api-key", api_key)
                        .header("anthropic-version", ANTHROPIC_VERSION)
                        .json(&payload)
                        .send()
                        .await
                        .map_err(map_reqwest_error)?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ToolError::Http(format!(
                            "{}: {}",
                            status,
                            truncate(&body, 200)
                        )));
                    }

                    let parsed: MessagesResponse = response
                        .json()
                        .await
                        .map_err(|e| ToolError::Response(e.to_string()))?;
                    let text = parsed
                        .content
                        .into_iter()
                        .filter_map(|block| block.text)
                        .collect::<Vec<_>>()
                        .join("");
                    if text.is_empty() {
                        return Err(ToolError::Response("empty completion".to_string()));
                    }
                    Ok(text)
                }
            })
            .await
    }

    async fn complete_json(&self, prompt: &str, system: &str) -> Result<Value, ToolError> {
        let response = self
            .send(Some(system), Value::String(prompt.to_string()))
            .await?;
        extract_json(&response)
            .ok_or_else(|| ToolError::Response("completion contained no JSON object".to_string()))
    }
}

#[async_trait]
impl Tool for ClaudeTool {
    fn name(&self) -> &str {
        "claude"
    }

    fn version(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> &[&'static str] {
        &CAPABILITIES
    }

    async fn health_check(&self) -> Result<(), ToolError> {
        self.api_key().map(|_| ())
    }
}

#[async_trait]
impl ReasoningTool for ClaudeTool {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, ToolError> {
        self.send(system, Value::String(prompt.to_string())).await
    }

    async fn synthesize(
        &self,
        findings: &[String],
        query: &str,
    ) -> Result<SynthesisAnalysis, ToolError> {
        let system = "You synthesize research findings into a concise answer. \
                      Return ONLY a JSON object with keys: summary (string), \
                      has_contradictions (bool), contradiction_hint (string or null).";
        let prompt = format!(
            "Query: {}\n\nFindings:\n{}\n\nReturn the JSON object only.",
            query,
            bullet_list(findings)
        );
        let value = self.complete_json(&prompt, system).await?;
        Ok(SynthesisAnalysis {
            summary: string_field(&value, "summary")
                .ok_or_else(|| ToolError::Response("synthesis missing summary".to_string()))?,
            has_contradictions: value
                .get("has_contradictions")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            contradiction_hint: string_field(&value, "contradiction_hint"),
        })
    }

    async fn analyze_discrepancy(
        &self,
        findings: &[String],
        query: &str,
        hint: &str,
    ) -> Result<DiscrepancyAnalysis, ToolError> {
        let system = "You analyze a contradiction detected in research findings. \
                      Return ONLY a JSON object with keys: description (string), \
                      severity (one of minor|moderate|significant), \
                      suggested_refinements (array of strings).";
        let prompt = format!(
            "Query: {}\nContradiction hint: {}\n\nFindings:\n{}\n\nReturn the JSON object only.",
            query,
            hint,
            bullet_list(findings)
        );
        let value = self.complete_json(&prompt, system).await?;
        Ok(DiscrepancyAnalysis {
            description: string_field(&value, "description")
                .ok_or_else(|| ToolError::Response("analysis missing description".to_string()))?,
            severity: parse_severity(
                value
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("moderate"),
            ),
            suggested_refinements: value
                .get("suggested_refinements")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    async fn describe_images(
        &self,
        prompt: &str,
        images: &[String],
    ) -> Result<String, ToolError> {
        let mut blocks: Vec<Value> = Vec::new();
        for image in images {
            blocks.push(image_block(image)?);
        }
        blocks.push(json!({"type": "text", "text": prompt}));
        self.send(None, Value::Array(blocks)).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(DEFAULT_TIMEOUT.as_millis() as u64)
    } else if err.is_connect() {
        ToolError::Http(format!("connect: {}", err))
    } else {
        ToolError::Http(err.to_string())
    }
}

fn image_block(image: &str) -> Result<Value, ToolError> {
    if let Some(rest) = image.strip_prefix("data:") {
        let (media_type, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| ToolError::Serialization(format!("unparsable data url: {}", truncate(image, 40))))?;
        Ok(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }))
    } else {
        Ok(json!({
            "type": "image",
            "source": {"type": "url", "url": image},
        }))
    }
}

fn parse_severity(label: &str) -> Severity {
    match label.to_ascii_lowercase().as_str() {
        "minor" => Severity::Minor,
        "significant" => Severity::Significant,
        _ => Severity::Moderate,
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Extract the first JSON object embedded in a completion.
fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

#[derive(Debug, Deserialize, Serialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_noisy_completion() {
        let value = extract_json("Sure, here you go:\n{\"summary\": \"ok\"}\nDone.").unwrap();
        assert_eq!(value["summary"], "ok");
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_image_block_shapes() {
        let data_url = image_block("data:image/png;base64,AAAA").unwrap();
        assert_eq!(data_url["source"]["type"], "base64");
        assert_eq!(data_url["source"]["media_type"], "image/png");

        let url = image_block("https://example.com/cat.png").unwrap();
        assert_eq!(url["source"]["type"], "url");

        assert!(image_block("data:image/png;notbase64").is_err());
    }

    #[test]
    fn test_severity_parse_defaults_to_moderate() {
        assert_eq!(parse_severity("minor"), Severity::Minor);
        assert_eq!(parse_severity("SIGNIFICANT"), Severity::Significant);
        assert_eq!(parse_severity("???"), Severity::Moderate);
    }

    #[test]
    fn test_health_check_requires_api_key() {
        tokio_test::block_on(async {
            let tool = ClaudeTool::from_api_key(None);
            assert!(tool.health_check().await.is_err());

            let tool = ClaudeTool::from_api_key(Some("sk-test".to_string()));
            assert!(tool.health_check().await.is_ok());
        });
    }
}
