//! Tool registry: lookup by name, the static "requires confirmation" set,
//! and failure-tolerant dispatch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use hitl_common::Config;
use serde_json::Value;

use crate::github::{CreateRepositoryTool, DeleteRepositoryTool, GitHubClient, ListRepositoriesTool};
use crate::search::WebSearchTool;
use crate::statistics::{MeanTool, MedianTool};
use crate::traits::{Tool, ToolSpec};
use crate::weather::WeatherTool;

/// What a tool invocation produced.
///
/// Dispatch never panics and never propagates: argument errors, HTTP
/// failures and unknown tool names all land in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok(String),
    Failed(String),
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Registered tools plus the set of names that need a human decision.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    dangerous: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool, the configured dangerous set,
    /// and API credentials taken from config.
    pub fn from_config(config: &Config) -> Self {
        let github = GitHubClient::new(config.tools.github_token.clone());

        let mut registry = Self::new();
        registry.register(Arc::new(MeanTool));
        registry.register(Arc::new(MedianTool));
        registry.register(Arc::new(WeatherTool::new(
            config.tools.openweather_api_key.clone(),
        )));
        registry.register(Arc::new(WebSearchTool::new(
            config.tools.tavily_api_key.clone(),
        )));
        registry.register(Arc::new(CreateRepositoryTool::new(github.clone())));
        registry.register(Arc::new(DeleteRepositoryTool::new(github.clone())));
        registry.register(Arc::new(ListRepositoriesTool::new(github)));

        for name in &config.agent.dangerous_tools {
            registry.mark_dangerous(name);
        }
        registry
    }

    /// Add or replace a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Require confirmation for `name`. The name need not be registered yet.
    pub fn mark_dangerous(&mut self, name: impl Into<String>) {
        self.dangerous.insert(name.into());
    }

    /// Static classification; arguments are never inspected.
    pub fn is_dangerous(&self, name: &str) -> bool {
        self.dangerous.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Specs for the model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "Model requested an unknown tool");
            return ToolOutcome::Failed(format!("Unknown tool: {name}"));
        };

        match tool.execute(arguments).await {
            Ok(result) if result.success => ToolOutcome::Ok(result.output),
            Ok(result) => ToolOutcome::Failed(
                result
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            ),
            Err(e) => ToolOutcome::Failed(e.to_string()),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("dangerous", &self.dangerous)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolResult;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
            match args.get("text").and_then(Value::as_str) {
                Some("boom") => anyhow::bail!("exploded"),
                Some("soft") => Ok(ToolResult::failure("soft failure")),
                Some(text) => Ok(ToolResult::success(text)),
                None => anyhow::bail!("Missing 'text' parameter"),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.mark_dangerous("delete_repository");
        registry
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let outcome = registry().invoke("echo", json!({"text": "hi"})).await;
        assert_eq!(outcome, ToolOutcome::Ok("hi".into()));
    }

    #[tokio::test]
    async fn test_invoke_failures_are_captured() {
        let registry = registry();
        assert_eq!(
            registry.invoke("echo", json!({"text": "boom"})).await,
            ToolOutcome::Failed("exploded".into())
        );
        assert_eq!(
            registry.invoke("echo", json!({"text": "soft"})).await,
            ToolOutcome::Failed("soft failure".into())
        );
        assert_eq!(
            registry.invoke("echo", json!({})).await,
            ToolOutcome::Failed("Missing 'text' parameter".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let outcome = registry().invoke("nope", json!({})).await;
        assert_eq!(outcome, ToolOutcome::Failed("Unknown tool: nope".into()));
    }

    #[test]
    fn test_confirmation_is_by_name_only() {
        let registry = registry();
        assert!(registry.is_dangerous("delete_repository"));
        assert!(!registry.is_dangerous("echo"));
        assert!(!registry.is_dangerous("Delete_Repository"));
    }

    #[test]
    fn test_from_config_registers_builtins() {
        let registry = ToolRegistry::from_config(&Config::default());
        assert_eq!(
            registry.names(),
            vec![
                "calculate_mean",
                "calculate_median",
                "create_repository",
                "delete_repository",
                "get_weather",
                "list_repositories",
                "web_search",
            ]
        );
        assert!(registry.is_dangerous("create_repository"));
        assert!(registry.is_dangerous("delete_repository"));
        assert!(!registry.is_dangerous("list_repositories"));
        assert_eq!(registry.specs().len(), 7);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_softly_at_call_time() {
        let registry = ToolRegistry::from_config(&Config::default());
        assert_eq!(
            registry.invoke("get_weather", json!({"city": "London"})).await,
            ToolOutcome::Failed("OPENWEATHER_API_KEY is not configured".into())
        );
        assert_eq!(
            registry.invoke("web_search", json!({"query": "rust"})).await,
            ToolOutcome::Failed("TAVILY_API_KEY is not configured".into())
        );
    }
}
