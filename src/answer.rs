//! Answer node
//!
//! Synthesizes the final reply from the full session history. Terminal.

use crate::context::{build_context, strip_reasoning};
use crate::llm::{ChatModel, ModelRequest};
use crate::error::OrchestrationError;
use crate::models::{AssistantMessage, Message};
use crate::state::ConversationState;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub const NODE_NAME: &str = "answer_query";

const ANSWER_INSTRUCTIONS: &str = "You are a financial assistant writing the final reply from tool outputs and the conversation history.\n\
  - Be concise but complete; use headings or bullet points where they help.\n\
  - Cite the tool or source behind every figure, with links when available.\n\
  - If data is missing, incomplete or a tool could not retrieve it, say so plainly.\n\
  - Never invent numbers or facts that are not in the context.";

pub struct AnswerNode {
    model: Arc<dyn ChatModel>,
}

impl AnswerNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn build_request(&self, state: &ConversationState) -> ModelRequest {
        let mut prompt = format!(
            "{}\n\nContext for answering the query:\n{}",
            ANSWER_INSTRUCTIONS,
            build_context(state, state.len())
        );
        if let Some(question) = state.latest_user_query() {
            prompt.push_str(&format!("\n\nUser question: {}", question));
        }

        ModelRequest::new(NODE_NAME).system(prompt)
    }

    /// Only fatal errors propagate. Any other model failure still yields an
    /// answer, one that says what could not be produced.
    pub async fn answer(&self, state: &ConversationState) -> Result<AssistantMessage> {
        match self.model.invoke(&self.build_request(state)).await {
            Ok(reply) => {
                info!(chars = reply.content.len(), "answer produced");
                Ok(reply)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "answer model failed, replying with what is missing");
                Ok(AssistantMessage::text(unavailable_answer(state, &e)))
            }
        }
    }
}

fn unavailable_answer(state: &ConversationState, err: &OrchestrationError) -> String {
    let mut text = match state.latest_user_query() {
        Some(question) => format!(
            "I could not produce an answer to \"{}\" right now ({}).",
            question, err
        ),
        None => format!("I could not produce an answer right now ({}).", err),
    };

    let mut missing: Vec<&str> = Vec::new();
    for message in state.messages() {
        if let Message::ToolResult(t) = message {
            if t.error.is_some() && !missing.contains(&t.tool_name.as_str()) {
                missing.push(t.tool_name.as_str());
            }
        }
    }

    if !missing.is_empty() {
        text.push_str(&format!(" Data that could not be retrieved: {}.", missing.join(", ")));
    }

    text
}

/// Final text as shown to the user.
pub fn display_answer(reply: &AssistantMessage) -> String {
    strip_reasoning(&reply.content).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::ToolResultMessage;

    #[tokio::test]
    async fn test_answer_sees_full_history() {
        let model = Arc::new(ScriptedModel::sequence(vec![AssistantMessage::text(
            "<think>cite it</think>\nIBM's P/E ratio is 22.5 (company_overview).",
        )]));
        let node = AnswerNode::new(model.clone());

        let mut state = ConversationState::from_user_query("What is IBM's P/E ratio?");
        for i in 0..10 {
            state.append(Message::assistant(format!("step {}", i)));
        }

        let reply = node.answer(&state).await.unwrap();
        assert_eq!(display_answer(&reply), "IBM's P/E ratio is 22.5 (company_overview).");

        let request = &model.requests()[0];
        assert!(request.tools.is_empty());
        let prompt = request.prompt_text();
        assert!(prompt.contains("User Content: What is IBM's P/E ratio?"));
        assert!(prompt.contains("step 0"));
        assert!(prompt.contains("step 9"));
    }

    #[tokio::test]
    async fn test_model_failure_names_missing_data() {
        let node = AnswerNode::new(Arc::new(ScriptedModel::new(|_| {
            Err(OrchestrationError::Llm("503 overloaded".into()))
        })));

        let mut state = ConversationState::from_user_query("What is IBM's P/E ratio?");
        let err = OrchestrationError::Upstream("HTTP 503".into());
        state.append(ToolResultMessage::failure("company_overview", None, &err).into());

        let reply = node.answer(&state).await.unwrap();
        assert!(reply.tool_calls.is_empty());
        assert!(reply.content.contains("could not produce an answer"));
        assert!(reply.content.contains("What is IBM's P/E ratio?"));
        assert!(reply.content.contains("Data that could not be retrieved: company_overview."));

        let fatal = AnswerNode::new(Arc::new(ScriptedModel::new(|_| {
            Err(OrchestrationError::Configuration("no key".into()))
        })));
        assert!(fatal.answer(&state).await.is_err());
    }
}
