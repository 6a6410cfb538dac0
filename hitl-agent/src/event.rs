//! Execution events and live sinks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One observable step of a turn, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Model produced text
    AiText { text: String },
    /// Model requested a tool (arguments after clamping)
    ToolCall {
        name: String,
        args: Value,
        call_id: String,
    },
    /// A tool result was recorded, real or denial
    ToolResult {
        name: String,
        content: String,
        call_id: String,
    },
    /// Execution stopped before a dangerous call
    SuspendRequired {
        name: String,
        args: Value,
        call_id: String,
    },
}

/// Receives events as they happen.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExecutionEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &ExecutionEvent) {}
}

/// Forwards to a channel; a dropped receiver is ignored.
impl EventSink for mpsc::UnboundedSender<ExecutionEvent> {
    fn emit(&self, event: &ExecutionEvent) {
        let _ = self.send(event.clone());
    }
}
