//! Thread display helpers.

use hitl_checkpoint::Message;

const TITLE_MAX_CHARS: usize = 40;
const DEFAULT_TITLE: &str = "New Chat";

/// Short title from the first assistant answer: its first sentence,
/// cut to 40 characters with an ellipsis.
pub fn thread_title(messages: &[Message]) -> String {
    let first_answer = messages.iter().find_map(|m| match m {
        Message::AssistantText { text } if !text.trim().is_empty() => Some(text.as_str()),
        _ => None,
    });

    let Some(text) = first_answer else {
        return DEFAULT_TITLE.to_string();
    };

    let sentence = text.split('.').next().unwrap_or(text).trim();
    if sentence.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    if sentence.chars().count() > TITLE_MAX_CHARS {
        let cut: String = sentence.chars().take(TITLE_MAX_CHARS).collect();
        format!("{cut}…")
    } else {
        sentence.to_string()
    }
}
