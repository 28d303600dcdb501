//! Model invocation boundary
//!
//! Nodes build a [`ModelRequest`] (prompt plus the tools the model may call)
//! and receive an [`AssistantMessage`] carrying text and zero or more tool-call
//! requests. How the model computes the reply is not the graph's concern.

use crate::error::OrchestrationError;
use crate::models::AssistantMessage;
use crate::tools::ToolSpec;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiModel;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum PromptMessage {
    System(String),
    Human(String),
}

/// A single prompt sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    /// Graph node issuing the call (for logs and scripted replies).
    pub node: &'static str,
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(node: &'static str) -> Self {
        Self {
            node,
            messages: Vec::new(),
            tools: Vec::new(),
            temperature: None,
        }
    }

    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.messages.push(PromptMessage::System(text.into()));
        self
    }

    pub fn human(mut self, text: impl Into<String>) -> Self {
        self.messages.push(PromptMessage::Human(text.into()));
        self
    }

    pub fn bind_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// All prompt text, in order.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m {
                PromptMessage::System(t) | PromptMessage::Human(t) => t.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Trait for chat model backends
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<AssistantMessage>;
}

type Responder = Box<dyn Fn(&ModelRequest) -> Result<AssistantMessage> + Send + Sync>;

/// Deterministic model for offline runs and tests.
/// Replies come from a closure, or from a fixed queue of messages.
pub struct ScriptedModel {
    responder: Responder,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<AssistantMessage> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with each message in turn; fails once the queue is exhausted.
    pub fn sequence(replies: Vec<AssistantMessage>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |request| {
            queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front()
                .ok_or_else(|| {
                    OrchestrationError::Llm(format!(
                        "scripted model has no reply left for {}",
                        request.node
                    ))
                })
        })
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<AssistantMessage> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        (self.responder)(request)
    }
}
