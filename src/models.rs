//! Core data models for the financial RAG agent

use crate::error::OrchestrationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Placeholder rendered whenever a message carries no text.
pub const NO_CONTENT: &str = "<no content>";

//
// ================= Tool Calls =================
//

/// A model's declared intent to invoke a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Look an argument up by name, falling back to its position.
    pub fn arg(&self, name: &str, position: usize) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(position))
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_tool_call(mut self, call: ToolCallRequest) -> Self {
        self.tool_calls.push(call);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultMessage {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResultMessage {
    pub fn success(tool_name: impl Into<String>, call_id: Option<String>, payload: &Value) -> Self {
        let content = match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Self {
            tool_name: tool_name.into(),
            call_id,
            content,
            error: None,
        }
    }

    /// Failure result visible to the verification step as "could not retrieve X".
    pub fn failure(
        tool_name: impl Into<String>,
        call_id: Option<String>,
        error: &OrchestrationError,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            content: format!("could not retrieve {}: {}", tool_name, error),
            tool_name,
            call_id,
            error: Some(error.to_string()),
        }
    }
}

/// One conversation turn. Each role carries its own fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User(UserMessage {
            content: content.into(),
        })
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(content))
    }

    /// Speaker label used when serializing context.
    pub fn speaker(&self) -> &'static str {
        match self {
            Message::User(_) => "User",
            Message::Assistant(_) => "Assistant",
            Message::ToolResult(_) => "Tool",
        }
    }

    /// Primary text, never empty.
    pub fn content(&self) -> &str {
        let raw = match self {
            Message::User(m) => m.content.as_str(),
            Message::Assistant(m) => m.content.as_str(),
            Message::ToolResult(m) => m.content.as_str(),
        };

        if raw.trim().is_empty() {
            NO_CONTENT
        } else {
            raw
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            Message::Assistant(m) => m.reasoning.as_deref().filter(|r| !r.trim().is_empty()),
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant(m) => &m.tool_calls,
            _ => &[],
        }
    }

    pub fn is_tool_error(&self) -> bool {
        matches!(self, Message::ToolResult(ToolResultMessage { error: Some(_), .. }))
    }
}

impl From<AssistantMessage> for Message {
    fn from(message: AssistantMessage) -> Self {
        Message::Assistant(message)
    }
}

impl From<ToolResultMessage> for Message {
    fn from(message: ToolResultMessage) -> Self {
        Message::ToolResult(message)
    }
}

//
// ================= Decisions =================
//

/// Category of work selected by the router for the next dispatch step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoutingDecision {
    FinancialMetrics,
    Wikipedia,
    WebSearch,
    HybridSearch,
    CheckAgent,
}

/// Outcome of the verification step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationDecision {
    Expand,
    Answer,
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoutingDecision::FinancialMetrics => "FinancialMetrics",
            RoutingDecision::Wikipedia => "Wikipedia",
            RoutingDecision::WebSearch => "WebSearch",
            RoutingDecision::HybridSearch => "HybridSearch",
            RoutingDecision::CheckAgent => "CheckAgent",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for VerificationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationDecision::Expand => "Expand",
            VerificationDecision::Answer => "Answer",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Run Results =================
//

/// Result of driving one session to its terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    /// Final answer with reasoning blocks removed.
    pub answer: String,
    /// Node executions used by this run.
    pub steps: usize,
    /// Messages appended to the session by this run.
    pub appended: usize,
    pub path: Vec<crate::agent::GraphNode>,
}
