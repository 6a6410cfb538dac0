//! Model client contract.

use async_trait::async_trait;
use hitl_checkpoint::{Message, ToolInvocationRequest};
use hitl_tools::ToolSpec;
use thiserror::Error;

/// Errors from a model endpoint. The engine surfaces these unchanged and
/// leaves the thread at its previous checkpoint.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("[{provider}] request failed: {message}")]
    Request { provider: String, message: String },

    #[error("[{provider}] API error (status {status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("[{provider}] failed to parse response: {message}")]
    Parse { provider: String, message: String },
}

/// One model response: optional text and zero or more tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolInvocationRequest>,
}

impl ModelTurn {
    /// Plain answer, no tools.
    pub fn answer(text: impl Into<String>) -> Self {
        Self::new(Some(text.into()), Vec::new())
    }

    /// Tool request without accompanying text.
    pub fn calls(tool_calls: Vec<ToolInvocationRequest>) -> Self {
        Self::new(None, tool_calls)
    }

    /// Blank text is dropped.
    pub fn new(text: Option<String>, tool_calls: Vec<ToolInvocationRequest>) -> Self {
        Self {
            text: text.filter(|t| !t.trim().is_empty()),
            tool_calls,
        }
    }
}

/// Chat-completion backend that may request tool invocations.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Send the full thread history plus the available tools; get the next turn.
    async fn converse(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_text_is_none() {
        assert_eq!(ModelTurn::new(Some("  \n".into()), vec![]).text, None);
        assert_eq!(ModelTurn::answer("hi").text.as_deref(), Some("hi"));
    }

    #[test]
    fn calls_constructor() {
        let turn = ModelTurn::calls(vec![ToolInvocationRequest::new(
            "c1",
            "get_weather",
            json!({"city": "London"}),
        )]);
        assert!(turn.text.is_none());
        assert_eq!(turn.tool_calls.len(), 1);
    }

    #[test]
    fn error_display_names_provider() {
        let err = ModelError::Api {
            provider: "groq".into(),
            status: 429,
            body: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "[groq] API error (status 429): rate limited");
    }
}
