//! Argument clamping for list-style tools.
//!
//! A model asking `list_repositories` for 500 entries gets at most the
//! ceiling. The clamp is applied before the call is recorded, so both the
//! displayed arguments and the executed ones carry the reduced value.

use hitl_common::ClampConfig;
use serde_json::Value;

/// Ceiling for limit-like numeric arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampPolicy {
    pub ceiling: u64,
    pub tool_prefixes: Vec<String>,
    pub argument_names: Vec<String>,
}

impl Default for ClampPolicy {
    fn default() -> Self {
        Self::from(&ClampConfig::default())
    }
}

impl From<&ClampConfig> for ClampPolicy {
    fn from(config: &ClampConfig) -> Self {
        Self {
            ceiling: config.ceiling,
            tool_prefixes: config.tool_prefixes.clone(),
            argument_names: config.argument_names.clone(),
        }
    }
}

impl ClampPolicy {
    /// Whether the tool is list/enumerate-style.
    pub fn applies_to(&self, tool_name: &str) -> bool {
        self.tool_prefixes
            .iter()
            .any(|prefix| tool_name.starts_with(prefix.as_str()))
    }

    /// Reduce over-ceiling limit arguments in place. Returns true if anything changed.
    pub fn clamp(&self, tool_name: &str, arguments: &mut Value) -> bool {
        if !self.applies_to(tool_name) {
            return false;
        }
        let Some(object) = arguments.as_object_mut() else {
            return false;
        };

        let mut changed = false;
        for name in &self.argument_names {
            let Some(value) = object.get_mut(name) else {
                continue;
            };
            if exceeds(value, self.ceiling) {
                tracing::debug!(
                    tool = %tool_name,
                    argument = %name,
                    requested = %value,
                    ceiling = self.ceiling,
                    "Clamping tool argument"
                );
                *value = Value::from(self.ceiling);
                changed = true;
            }
        }
        changed
    }
}

fn exceeds(value: &Value, ceiling: u64) -> bool {
    if let Some(n) = value.as_u64() {
        return n > ceiling;
    }
    #[allow(clippy::cast_precision_loss)]
    if let Some(f) = value.as_f64() {
        return f > ceiling as f64;
    }
    // numeric strings ("500") are common in model output
    value
        .as_str()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .is_some_and(|f| {
            #[allow(clippy::cast_precision_loss)]
            let ceiling = ceiling as f64;
            f > ceiling
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("list_repositories", json!({"limit": 500}), json!({"limit": 10}), true; "over ceiling")]
    #[test_case("list_repositories", json!({"limit": 10}), json!({"limit": 10}), false; "at ceiling")]
    #[test_case("list_repositories", json!({"limit": 3}), json!({"limit": 3}), false; "under ceiling")]
    #[test_case("list_repositories", json!({"limit": 12.5}), json!({"limit": 10}), true; "float")]
    #[test_case("list_repositories", json!({"limit": "500"}), json!({"limit": 10}), true; "numeric string")]
    #[test_case("enumerate_issues", json!({"per_page": 100}), json!({"per_page": 10}), true; "other limit name")]
    #[test_case("get_weather", json!({"limit": 500}), json!({"limit": 500}), false; "not a list tool")]
    #[test_case("list_repositories", json!({"username": "octo"}), json!({"username": "octo"}), false; "no limit")]
    fn clamps_limit_like_arguments(tool: &str, mut args: Value, expected: Value, changed: bool) {
        let policy = ClampPolicy::default();
        assert_eq!(policy.clamp(tool, &mut args), changed);
        assert_eq!(args, expected);
    }

    #[test]
    fn respects_configured_ceiling() {
        let policy = ClampPolicy {
            ceiling: 25,
            ..ClampPolicy::default()
        };
        let mut args = json!({"limit": 30, "max_results": 20});
        assert!(policy.clamp("list_repositories", &mut args));
        assert_eq!(args, json!({"limit": 25, "max_results": 20}));
    }

    #[test]
    fn ignores_non_object_arguments() {
        let mut args = json!([500]);
        assert!(!ClampPolicy::default().clamp("list_repositories", &mut args));
    }
}
