//! Terminal rendering of messages and live events.

use hitl_agent::{EventSink, ExecutionEvent, Message};

const PREVIEW_CHARS: usize = 300;

/// Truncate for display, on a char boundary.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

pub fn format_message(message: &Message) -> String {
    match message {
        Message::UserText { text } => format!("you: {text}"),
        Message::AssistantText { text } => format!("assistant: {text}"),
        Message::AssistantToolCall { calls } => calls
            .iter()
            .map(|c| format!("  → {}({}) [{}]", c.tool_name, c.arguments, c.call_id))
            .collect::<Vec<_>>()
            .join("\n"),
        Message::ToolResult {
            tool_name,
            content,
            is_error,
            ..
        } => {
            let label = if *is_error { "error" } else { "result" };
            format!("  ← {tool_name} {label}: {}", truncate(content, PREVIEW_CHARS))
        }
    }
}

pub fn format_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::AiText { text } => format!("assistant: {text}"),
        ExecutionEvent::ToolCall { name, args, .. } => format!("  → {name}({args})"),
        ExecutionEvent::ToolResult { name, content, .. } => {
            format!("  ← {name}: {}", truncate(content, PREVIEW_CHARS))
        }
        ExecutionEvent::SuspendRequired { name, args, .. } => {
            format!("  ⚠ {name} needs your approval\n    arguments: {args}")
        }
    }
}

/// Prints every event to stdout as it happens.
pub struct PrintSink;

impl EventSink for PrintSink {
    fn emit(&self, event: &ExecutionEvent) {
        println!("{}", format_event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 3), "ééé...");
    }

    #[test]
    fn renders_tool_events() {
        let call = ExecutionEvent::ToolCall {
            name: "get_weather".into(),
            args: json!({"city": "London"}),
            call_id: "c1".into(),
        };
        assert_eq!(format_event(&call), r#"  → get_weather({"city":"London"})"#);

        let suspend = ExecutionEvent::SuspendRequired {
            name: "delete_repository".into(),
            args: json!({"repo_name": "foo"}),
            call_id: "c2".into(),
        };
        assert!(format_event(&suspend).contains("delete_repository needs your approval"));
    }

    #[test]
    fn renders_error_results() {
        let msg = Message::tool_result("c1", "broken", "Tool 'broken' failed: boom", true);
        assert_eq!(format_message(&msg), "  ← broken error: Tool 'broken' failed: boom");
    }
}
