//! Verification node
//!
//! Decides whether the gathered context answers the question (`answer_query`)
//! or whether the query has to be refined first (`expand_query`).

use crate::context::build_context;
use crate::llm::{ChatModel, ModelRequest};
use crate::models::{AssistantMessage, Message, VerificationDecision};
use crate::state::{ConversationState, EXPAND_QUERY_TOOL};
use crate::tools::{control_tool_specs, ANSWER_QUERY};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NODE_NAME: &str = "check_agent";

const VERIFY_INSTRUCTIONS: &str = "You check whether a financial assistant has gathered enough to answer. \
Look at the user's latest query, the tool outputs and the conversation history, then call exactly one tool:\n\
  1. expand_query: the query is ambiguous, factually wrong, or missing key details such as the company name, ticker or period, \
or a tool reported that it could not retrieve the data.\n\
  2. answer_query: the retrieved content fully covers what the user asked.";

pub struct VerificationNode {
    model: Arc<dyn ChatModel>,
    window: usize,
}

impl VerificationNode {
    pub fn new(model: Arc<dyn ChatModel>, window: usize) -> Self {
        Self { model, window }
    }

    pub fn build_request(&self, state: &ConversationState) -> ModelRequest {
        ModelRequest::new(NODE_NAME)
            .system(format!(
                "{}\n\nConversation history:\n{}",
                VERIFY_INSTRUCTIONS,
                build_context(state, self.window)
            ))
            .bind_tools(control_tool_specs())
    }

    pub async fn verify(&self, state: &ConversationState) -> Result<AssistantMessage> {
        let request = self.build_request(state);

        match self.model.invoke(&request).await {
            Ok(reply) => {
                debug!(tool_calls = reply.tool_calls.len(), "verification reply received");
                Ok(reply)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "verification model failed, falling back to answer");
                Ok(AssistantMessage::text(format!(
                    "Verification model unavailable ({}); answering with the context gathered so far.",
                    e
                )))
            }
        }
    }
}

/// Edge out of verification: the first recognized control call, else `Answer`.
pub fn decide_verification(message: &Message) -> VerificationDecision {
    match message.tool_calls().first().map(|c| c.name.as_str()) {
        Some(EXPAND_QUERY_TOOL) => VerificationDecision::Expand,
        Some(ANSWER_QUERY) => VerificationDecision::Answer,
        other => {
            warn!(tool = ?other, "verification produced no recognized call, defaulting to Answer");
            VerificationDecision::Answer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::llm::ScriptedModel;
    use crate::models::ToolCallRequest;

    #[test]
    fn test_decisions() {
        let expand = Message::from(
            AssistantMessage::text("").with_tool_call(ToolCallRequest::new("expand_query")),
        );
        let answer = Message::from(
            AssistantMessage::text("").with_tool_call(ToolCallRequest::new("answer_query")),
        );
        let stray = Message::from(
            AssistantMessage::text("expand_query").with_tool_call(ToolCallRequest::new("hybrid_search")),
        );

        assert_eq!(decide_verification(&expand), VerificationDecision::Expand);
        assert_eq!(decide_verification(&answer), VerificationDecision::Answer);
        assert_eq!(decide_verification(&stray), VerificationDecision::Answer);
        assert_eq!(decide_verification(&Message::assistant("")), VerificationDecision::Answer);
    }

    #[tokio::test]
    async fn test_only_control_tools_are_bound() {
        let model = Arc::new(ScriptedModel::sequence(vec![AssistantMessage::text("")
            .with_tool_call(ToolCallRequest::new("answer_query"))]));
        let node = VerificationNode::new(model.clone(), 7);
        let state = ConversationState::from_user_query("What is IBM's P/E ratio?");

        let reply = node.verify(&state).await.unwrap();
        assert_eq!(
            decide_verification(&Message::from(reply)),
            VerificationDecision::Answer
        );

        let request = &model.requests()[0];
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["expand_query", "answer_query"]);
        assert!(request.prompt_text().contains("What is IBM's P/E ratio?"));
    }

    #[tokio::test]
    async fn test_model_failure_defaults_to_answer() {
        let model = Arc::new(ScriptedModel::new(|_| Err(OrchestrationError::Llm("down".into()))));
        let node = VerificationNode::new(model, 7);

        let reply = node.verify(&ConversationState::from_user_query("q")).await.unwrap();
        assert_eq!(
            decide_verification(&Message::from(reply)),
            VerificationDecision::Answer
        );
    }
}
