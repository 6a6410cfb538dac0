//! Web search via the Tavily API.

use crate::traits::{required_str, Tool, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RESULTS: u32 = 5;

pub struct WebSearchTool {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u32,
    topic: &'a str,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: String,
}

/// Summary first, then numbered hits with their source URL.
fn format_results(response: &SearchResponse) -> String {
    let mut parts = Vec::new();

    if let Some(answer) = response.answer.as_deref().filter(|a| !a.is_empty()) {
        parts.push(format!("Summary: {answer}"));
    }

    for (i, hit) in response.results.iter().enumerate() {
        parts.push(format!(
            "[{}] {}\n{}\nSource: {}",
            i + 1,
            hit.title.as_deref().unwrap_or("No title"),
            hit.content.as_deref().unwrap_or("No content"),
            hit.url
        ));
    }

    if parts.is_empty() {
        "No results found.".to_string()
    } else {
        parts.join("\n\n")
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information. Returns a summary and the top results with sources."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let query = required_str(&args, "query")?;
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(ToolResult::failure("TAVILY_API_KEY is not configured"));
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(api_key)
            .json(&SearchRequest {
                query,
                max_results: MAX_RESULTS,
                topic: "general",
                include_answer: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ToolResult::failure(format!(
                "Search request failed ({status}): {body}"
            )));
        }

        let results: SearchResponse = response.json().await?;
        tracing::debug!(query = %query, hits = results.results.len(), "Web search finished");
        Ok(ToolResult::success(format_results(&results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_format_without_hits() {
        let empty = SearchResponse {
            answer: None,
            results: vec![],
        };
        assert_eq!(format_results(&empty), "No results found.");
    }

    #[tokio::test]
    async fn test_search_formats_answer_and_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer tv-key"))
            .and(body_partial_json(json!({
                "query": "rust async",
                "max_results": 5,
                "topic": "general"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Rust has async/await.",
                "results": [
                    {"title": "Async Book", "content": "Intro", "url": "https://example.com/a"},
                    {"content": "Tokio docs", "url": "https://example.com/b"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = WebSearchTool::with_base_url(Some("tv-key".into()), &server.uri());
        let result = tool.execute(json!({"query": "rust async"})).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.output,
            "Summary: Rust has async/await.\n\n\
             [1] Async Book\nIntro\nSource: https://example.com/a\n\n\
             [2] No title\nTokio docs\nSource: https://example.com/b"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_soft_failure() {
        let result = WebSearchTool::new(None)
            .execute(json!({"query": "x"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("TAVILY_API_KEY is not configured"));
    }
}
