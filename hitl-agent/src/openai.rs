//! OpenAI-compatible chat-completions client with function calling.
//!
//! Works against any endpoint speaking the `/v1/chat/completions` dialect
//! (Groq by default, OpenAI, vLLM, Ollama's compatibility layer).

use async_trait::async_trait;
use hitl_checkpoint::{Message, ToolInvocationRequest};
use hitl_common::ModelConfig;
use hitl_tools::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::model::{ModelClient, ModelError, ModelTurn};

const PROVIDER: &str = "openai-compatible";

/// Chat-completions client.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    system_prompt: Option<String>,
}

impl OpenAiCompatibleClient {
    /// `base_url` excludes the `/v1/chat/completions` suffix.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self::build(base_url.into(), api_key, model.into(), Duration::from_secs(120))
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let mut client = Self::build(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        client.temperature = config.temperature;
        client
    }

    fn build(base_url: String, api_key: Option<String>, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: 0.2,
            system_prompt: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_error(&self, message: impl std::fmt::Display) -> ModelError {
        ModelError::Request {
            provider: PROVIDER.into(),
            message: format!("{} ({})", message, self.model),
        }
    }

    fn parse_error(message: impl std::fmt::Display) -> ModelError {
        ModelError::Parse {
            provider: PROVIDER.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn converse(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn, ModelError> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: to_wire_messages(self.system_prompt.as_deref(), history),
            tools: tools.iter().map(WireTool::from).collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(Self::parse_error)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Self::parse_error("response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(from_wire_call)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            tool_calls = tool_calls.len(),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            "Model turn received"
        );

        Ok(ModelTurn::new(choice.message.content, tool_calls))
    }
}

// ============================================================================
// Wire conversion
// ============================================================================

fn to_wire_messages(system_prompt: Option<&str>, history: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(history.len() + 1);
    if let Some(prompt) = system_prompt {
        wire.push(WireMessage::text("system", prompt));
    }

    for message in history {
        match message {
            Message::UserText { text } => wire.push(WireMessage::text("user", text)),
            Message::AssistantText { text } => wire.push(WireMessage::text("assistant", text)),
            Message::AssistantToolCall { calls } => {
                let calls: Vec<WireToolCall> = calls.iter().map(WireToolCall::from).collect();
                // text and tool calls from one response travel as one assistant message
                match wire.last_mut() {
                    Some(last) if last.role == "assistant" && last.tool_calls.is_empty() => {
                        last.tool_calls = calls;
                    }
                    _ => wire.push(WireMessage {
                        role: "assistant".into(),
                        content: None,
                        tool_calls: calls,
                        tool_call_id: None,
                    }),
                }
            }
            Message::ToolResult {
                call_id, content, ..
            } => wire.push(WireMessage {
                role: "tool".into(),
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.clone()),
            }),
        }
    }
    wire
}

fn from_wire_call(call: WireToolCall) -> Result<ToolInvocationRequest, ModelError> {
    let arguments = if call.function.arguments.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(&call.function.arguments).map_err(|e| {
            OpenAiCompatibleClient::parse_error(format!(
                "invalid arguments for tool '{}': {e}",
                call.function.name
            ))
        })?
    };
    Ok(ToolInvocationRequest::new(call.id, call.function.name, arguments))
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionSpec {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    arguments: String,
}

impl From<&ToolInvocationRequest> for WireToolCall {
    fn from(call: &ToolInvocationRequest) -> Self {
        Self {
            id: call.call_id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.tool_name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn weather_spec() -> ToolSpec {
        ToolSpec {
            name: "get_weather".into(),
            description: "Weather".into(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_wire_messages_merge_text_and_calls() {
        let history = vec![
            Message::user("delete foo"),
            Message::assistant("Deleting it."),
            Message::AssistantToolCall {
                calls: vec![ToolInvocationRequest::new(
                    "c1",
                    "delete_repository",
                    json!({"repo_name": "foo"}),
                )],
            },
            Message::tool_result("c1", "delete_repository", "USER DENIED", false),
        ];

        let wire = serde_json::to_value(to_wire_messages(Some("be brief"), &history)).unwrap();
        assert_eq!(
            wire,
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "delete foo"},
                {
                    "role": "assistant",
                    "content": "Deleting it.",
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "delete_repository", "arguments": "{\"repo_name\":\"foo\"}"}
                    }]
                },
                {"role": "tool", "content": "USER DENIED", "tool_call_id": "c1"}
            ])
        );
    }

    #[test]
    fn test_tool_call_without_text_has_null_content() {
        let history = vec![
            Message::user("weather?"),
            Message::AssistantToolCall {
                calls: vec![ToolInvocationRequest::new("c1", "get_weather", json!({}))],
            },
        ];
        let wire = serde_json::to_value(to_wire_messages(None, &history)).unwrap();
        assert_eq!(wire[1]["role"], "assistant");
        assert!(wire[1]["content"].is_null());
    }

    #[tokio::test]
    async fn test_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "llama-3.3-70b-versatile",
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "get_weather"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(
            server.uri(),
            Some("sk-test".into()),
            "llama-3.3-70b-versatile",
        );
        let turn = client
            .converse(&[Message::user("weather in London?")], &[weather_spec()])
            .await
            .unwrap();

        assert!(turn.text.is_none());
        assert_eq!(
            turn.tool_calls,
            vec![ToolInvocationRequest::new("call_abc", "get_weather", json!({"city": "London"}))]
        );
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello there."}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), None, "m");
        let turn = client.converse(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(turn.text.as_deref(), Some("Hello there."));
        assert!(turn.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), None, "m");
        let err = client.converse(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 429, ref body, .. } if body == "slow down"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_parse_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"tool_calls": [{
                    "id": "c", "type": "function",
                    "function": {"name": "get_weather", "arguments": "{not json"}
                }]}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), None, "m");
        let err = client.converse(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let client = OpenAiCompatibleClient::new("http://127.0.0.1:1", None, "m");
        let err = client.converse(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, ModelError::Request { .. }));
    }
}
