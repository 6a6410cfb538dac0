//! Mean and median over a list of numbers.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{Tool, ToolResult};

fn parse_numbers(args: &Value) -> anyhow::Result<Vec<f64>> {
    let values = args
        .get("numbers")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Missing 'numbers' parameter"))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| anyhow::anyhow!("'numbers' must contain only numbers, got {v}"))
        })
        .collect()
}

fn numbers_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "numbers": {
                "type": "array",
                "items": { "type": "number" },
                "description": "The numbers to aggregate"
            }
        },
        "required": ["numbers"]
    })
}

pub fn mean(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
}

pub fn median(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Arithmetic mean.
pub struct MeanTool;

#[async_trait]
impl Tool for MeanTool {
    fn name(&self) -> &str {
        "calculate_mean"
    }

    fn description(&self) -> &str {
        "Calculate the arithmetic mean (average) of a list of numbers"
    }

    fn parameters_schema(&self) -> Value {
        numbers_schema()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let numbers = parse_numbers(&args)?;
        Ok(match mean(&numbers) {
            Some(value) => ToolResult::success(value.to_string()),
            None => ToolResult::failure("Cannot compute the mean of an empty list"),
        })
    }
}

/// Median.
pub struct MedianTool;

#[async_trait]
impl Tool for MedianTool {
    fn name(&self) -> &str {
        "calculate_median"
    }

    fn description(&self) -> &str {
        "Calculate the median of a list of numbers"
    }

    fn parameters_schema(&self) -> Value {
        numbers_schema()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let numbers = parse_numbers(&args)?;
        Ok(match median(&numbers) {
            Some(value) => ToolResult::success(value.to_string()),
            None => ToolResult::failure("Cannot compute the median of an empty list"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[1.0, 2.0, 3.0, 4.0], 2.5; "even count")]
    #[test_case(&[5.0], 5.0; "single")]
    #[test_case(&[-1.0, 1.0], 0.0; "negative")]
    fn computes_mean(input: &[f64], expected: f64) {
        assert_eq!(mean(input), Some(expected));
    }

    #[test_case(&[3.0, 1.0, 2.0], 2.0; "odd count unsorted")]
    #[test_case(&[4.0, 1.0, 3.0, 2.0], 2.5; "even count")]
    #[test_case(&[7.0], 7.0; "single")]
    fn computes_median(input: &[f64], expected: f64) {
        assert_eq!(median(input), Some(expected));
    }

    #[test]
    fn empty_input_has_no_aggregate() {
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
    }

    #[tokio::test]
    async fn mean_tool_formats_result() {
        let result = MeanTool.execute(json!({"numbers": [1, 2, 3, 4]})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "2.5");
    }

    #[tokio::test]
    async fn median_tool_rejects_non_numbers() {
        let err = MedianTool
            .execute(json!({"numbers": [1, "two"]}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("only numbers"));
    }

    #[tokio::test]
    async fn empty_list_is_soft_failure() {
        let result = MedianTool.execute(json!({"numbers": []})).await.unwrap();
        assert!(!result.success);
    }
}
