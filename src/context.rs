//! Context window serialization
//!
//! Renders the most recent messages of a session into one prompt-ready
//! string. Blocks are joined with [`CONTEXT_SEPARATOR`]; a line consisting of
//! `---` never appears inside a block, so [`split_context_blocks`] recovers
//! them exactly.

use crate::models::{Message, ToolCallRequest};
use crate::state::ConversationState;
use serde_json::Value;

/// Default number of messages shown to routing and verification prompts.
pub const DEFAULT_CONTEXT_WINDOW: usize = 7;

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Serialize the last `min(window, len)` messages of `state`, oldest first.
pub fn build_context(state: &ConversationState, window: usize) -> String {
    build_context_from(state.messages(), window)
}

pub fn build_context_from(messages: &[Message], window: usize) -> String {
    let take = window.min(messages.len());
    let recent = &messages[messages.len() - take..];

    recent
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Split a string produced by [`build_context`] back into message blocks.
pub fn split_context_blocks(context: &str) -> Vec<&str> {
    if context.is_empty() {
        return Vec::new();
    }
    context.split(CONTEXT_SEPARATOR).collect()
}

fn render_block(message: &Message) -> String {
    let speaker = match message {
        Message::ToolResult(t) => format!("{} [{}]", message.speaker(), t.tool_name),
        _ => message.speaker().to_string(),
    };

    let mut lines = vec![format!("{} Content: {}", speaker, message.content())];

    if let Some(reasoning) = message.reasoning() {
        lines.push(format!("{} Reasoning: {}", speaker, reasoning.trim()));
    }

    if let Message::ToolResult(t) = message {
        if let Some(error) = &t.error {
            lines.push(format!("{} Error: {}", speaker, error));
        }
    }

    for call in message.tool_calls() {
        lines.push(format!("Tool Call: {}", render_call(call)));
    }

    escape_separator_lines(&lines.join("\n"))
}

/// `name(positional..., key=value...)` with values rendered as JSON.
pub fn render_call(call: &ToolCallRequest) -> String {
    let args = call
        .args
        .iter()
        .map(render_value)
        .chain(
            call.kwargs
                .iter()
                .map(|(k, v)| format!("{}={}", k, render_value(v))),
        )
        .collect::<Vec<_>>()
        .join(", ");

    format!("{}({})", call.name, args)
}

fn render_value(value: &Value) -> String {
    value.to_string()
}

fn escape_separator_lines(block: &str) -> String {
    if !block.lines().any(|line| line == "---") {
        return block.to_string();
    }

    block
        .split('\n')
        .map(|line| if line == "---" { "- - -" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove `<think>...</think>` blocks (and one trailing newline each).
/// An unterminated block is left untouched.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(THINK_OPEN) {
        let after_open = &rest[start + THINK_OPEN.len()..];
        let Some(close) = after_open.find(THINK_CLOSE) else {
            break;
        };

        out.push_str(&rest[..start]);
        let mut tail = &after_open[close + THINK_CLOSE.len()..];
        if let Some(stripped) = tail.strip_prefix('\n') {
            tail = stripped;
        }
        rest = tail;
    }

    out.push_str(rest);
    out
}
