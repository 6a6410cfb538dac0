//! Message and checkpoint types.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One model-requested tool call. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// Unique within the thread
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolInvocationRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Entry in a thread's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    AssistantToolCall {
        calls: Vec<ToolInvocationRequest>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
        }
    }

    /// Short role label, used for logging and history rendering.
    pub fn role(&self) -> &'static str {
        match self {
            Self::UserText { .. } => "user",
            Self::AssistantText { .. } | Self::AssistantToolCall { .. } => "assistant",
            Self::ToolResult { .. } => "tool",
        }
    }
}

/// Calls of the most recent tool batch that have no `ToolResult` yet, in batch order.
///
/// Empty when the history does not end inside a tool batch.
pub fn unresolved_calls(messages: &[Message]) -> Vec<&ToolInvocationRequest> {
    let Some(batch_index) = messages
        .iter()
        .rposition(|m| matches!(m, Message::AssistantToolCall { .. }))
    else {
        return Vec::new();
    };

    let Message::AssistantToolCall { calls } = &messages[batch_index] else {
        return Vec::new();
    };

    let answered: HashSet<&str> = messages[batch_index + 1..]
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    calls
        .iter()
        .filter(|call| !answered.contains(call.call_id.as_str()))
        .collect()
}

/// Whether `call_id` already appears in any tool batch of the history.
pub fn call_id_in_use(messages: &[Message], call_id: &str) -> bool {
    messages.iter().any(|m| match m {
        Message::AssistantToolCall { calls } => calls.iter().any(|c| c.call_id == call_id),
        _ => false,
    })
}

/// What the engine has to do when it next picks the thread up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    /// Nothing in flight; a new user turn may start.
    None,
    /// A dangerous call awaits a human decision.
    ResumeTools,
}

impl NextStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ResumeTools => "resume_tools",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "resume_tools" => Some(Self::ResumeTools),
            _ => None,
        }
    }
}

/// Dangerous call waiting for approval. At most one per thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub thread_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl PendingConfirmation {
    pub fn for_call(thread_id: impl Into<String>, call: &ToolInvocationRequest) -> Self {
        Self {
            thread_id: thread_id.into(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// Snapshot of a thread at a step boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub next: NextStep,
    pub pending: Option<PendingConfirmation>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint with nothing in flight.
    pub fn idle(
        thread_id: impl Into<String>,
        messages: Vec<Message>,
        previous: Option<&Checkpoint>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages,
            next: NextStep::None,
            pending: None,
            created_at: next_timestamp(previous),
        }
    }

    /// Checkpoint parked on a dangerous call.
    pub fn suspended(
        messages: Vec<Message>,
        pending: PendingConfirmation,
        previous: Option<&Checkpoint>,
    ) -> Self {
        Self {
            thread_id: pending.thread_id.clone(),
            messages,
            next: NextStep::ResumeTools,
            pending: Some(pending),
            created_at: next_timestamp(previous),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.next == NextStep::ResumeTools
    }

    /// `next == ResumeTools` exactly when a pending confirmation is present,
    /// and the pending call belongs to this thread's unresolved batch.
    pub fn is_consistent(&self) -> bool {
        match (&self.next, &self.pending) {
            (NextStep::None, None) => true,
            (NextStep::ResumeTools, Some(pending)) => {
                pending.thread_id == self.thread_id
                    && unresolved_calls(&self.messages)
                        .iter()
                        .any(|call| call.call_id == pending.call_id)
            }
            _ => false,
        }
    }
}

/// Strictly after `previous`, even if the wall clock went backwards.
/// Microsecond precision, matching what the stores persist.
fn next_timestamp(previous: Option<&Checkpoint>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(prev) if now <= prev.created_at => prev.created_at + Duration::microseconds(1),
        _ => now,
    }
}
