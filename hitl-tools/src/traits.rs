//! The `Tool` contract and the values tools hand back to the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one tool run as the tool sees it.
///
/// `success == false` is a soft failure: the tool ran but could not do what
/// was asked (bad city, GitHub said no). Hard failures are `Err` from
/// [`Tool::execute`]. The registry turns both into a failed outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Text fed back to the model; JSON documents are serialized compactly
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments
    pub parameters: serde_json::Value,
}

/// A capability the model may call.
///
/// Names are unique within a registry. Whether a tool needs a human
/// decision is registry configuration, not a property of the tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    /// Run with already-clamped arguments.
    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{key}' parameter"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn soft_failure_carries_no_output() {
        let failed = ToolResult::failure("City not found");
        assert!(!failed.success);
        assert!(failed.output.is_empty());
        assert_eq!(failed.error.as_deref(), Some("City not found"));

        let ok = ToolResult::success("3.5");
        assert!(ok.success && ok.error.is_none());
    }

    #[test]
    fn json_output_is_compact() {
        let result = ToolResult::json(&json!({"city": "London", "humidity": "81%"}));
        assert_eq!(result.output, r#"{"city":"London","humidity":"81%"}"#);
    }

    #[test]
    fn required_str_rejects_blank() {
        let args = json!({"city": "  ", "name": "x"});
        assert!(required_str(&args, "city").is_err());
        assert!(required_str(&args, "missing").is_err());
        assert_eq!(required_str(&args, "name").unwrap(), "x");
    }
}
