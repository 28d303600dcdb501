//! Router node
//!
//! Asks a model bound to every capability tool which category of work comes
//! next, and turns its reply into a [`RoutingDecision`].

use crate::context::{build_context, strip_reasoning};
use crate::llm::{ChatModel, ModelRequest};
use crate::models::{AssistantMessage, Message, RoutingDecision};
use crate::state::ConversationState;
use crate::tools::metrics::MetricKind;
use crate::tools::{ToolSpec, COMPANY_OVERVIEW, GOOGLE_SEARCH, HYBRID_SEARCH, WIKI_LOOKUP};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Audit tag and model request label for this node.
pub const NODE_NAME: &str = "query_redirection_agent";

/// Text marker meaning "existing context is enough, go to verification".
pub const CHECK_AGENT_MARKER: &str = "CheckAgent";

const ROUTER_INSTRUCTIONS: &str = "You are the orchestrator of a financial retrieval-augmented assistant. \
Read the user's latest message, the conversation so far and any earlier tool output, then pick exactly one next action:\n\
  1. Calling FinancialMetrics: the user gives numeric return series, or asks about a specific ratio, valuation multiple or portfolio statistic. Call the matching metric tool or company_overview.\n\
  2. Searching Wikipedia: the user mentions the encyclopedia or wants historical or background context. Call wiki_lookup.\n\
  3. Searching WebSearch: the user asks for the latest, current or breaking information. Call google_search.\n\
  4. Doing HybridSearch: general questions answerable from the private document index (annual reports, filings). Call hybrid_search.\n\
  5. Moving to CheckAgent: the conversation already holds everything needed to answer. Call no tool.\n\n\
After thinking, reply with exactly one of these phrases:\n\
  - Calling FinancialMetrics\n\
  - Searching Wikipedia\n\
  - Searching WebSearch\n\
  - Doing HybridSearch\n\
  - Moving to CheckAgent";

pub struct RouterNode {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolSpec>,
    window: usize,
}

impl RouterNode {
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<ToolSpec>, window: usize) -> Self {
        Self {
            model,
            tools,
            window,
        }
    }

    pub fn build_request(&self, state: &ConversationState) -> ModelRequest {
        let mut prompt = format!(
            "{}\n\nConversation history:\n{}",
            ROUTER_INSTRUCTIONS,
            build_context(state, self.window)
        );
        if let Some(query) = state.effective_query() {
            prompt.push_str(&format!("\n\nCurrent query: {}", query));
        }

        ModelRequest::new(NODE_NAME)
            .system(prompt)
            .bind_tools(self.tools.clone())
    }

    /// Produce the assistant message to append. Non-fatal model failures
    /// become a plain message, which then takes the default edge.
    pub async fn route(&self, state: &ConversationState) -> Result<AssistantMessage> {
        let request = self.build_request(state);

        match self.model.invoke(&request).await {
            Ok(reply) => {
                debug!(
                    tool_calls = reply.tool_calls.len(),
                    "router reply received"
                );
                Ok(reply)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "router model failed, falling back to default edge");
                Ok(AssistantMessage::text(format!(
                    "Routing model unavailable ({}); falling back to document search.",
                    e
                )))
            }
        }
    }
}

/// Category a capability tool belongs to, by tool name.
pub fn decision_for_tool(name: &str) -> Option<RoutingDecision> {
    match name {
        COMPANY_OVERVIEW => Some(RoutingDecision::FinancialMetrics),
        GOOGLE_SEARCH => Some(RoutingDecision::WebSearch),
        WIKI_LOOKUP => Some(RoutingDecision::Wikipedia),
        HYBRID_SEARCH => Some(RoutingDecision::HybridSearch),
        other if other.parse::<MetricKind>().is_ok() => Some(RoutingDecision::FinancialMetrics),
        _ => None,
    }
}

/// Edge out of the router. Priority: first tool call's category, then the
/// verification marker in the visible text, then hybrid search.
pub fn decide_edge(message: &Message) -> RoutingDecision {
    if let Some(decision) = message
        .tool_calls()
        .first()
        .and_then(|call| decision_for_tool(&call.name))
    {
        return decision;
    }

    if let Message::Assistant(reply) = message {
        if strip_reasoning(&reply.content).contains(CHECK_AGENT_MARKER) {
            return RoutingDecision::CheckAgent;
        }
    }

    warn!(
        content = %message.content(),
        "router produced no recognized signal, defaulting to HybridSearch"
    );
    RoutingDecision::HybridSearch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::llm::ScriptedModel;
    use crate::models::ToolCallRequest;
    use crate::tools::{create_default_registry, control_tool_specs};

    fn call(name: &str) -> ToolCallRequest {
        ToolCallRequest::new(name)
    }

    #[test]
    fn test_tool_call_categories() {
        let cases = [
            ("company_overview", RoutingDecision::FinancialMetrics),
            ("sharpe_ratio", RoutingDecision::FinancialMetrics),
            ("max_drawdown", RoutingDecision::FinancialMetrics),
            ("google_search", RoutingDecision::WebSearch),
            ("wiki_lookup", RoutingDecision::Wikipedia),
            ("hybrid_search", RoutingDecision::HybridSearch),
        ];

        for (name, expected) in cases {
            let msg = Message::from(AssistantMessage::text("").with_tool_call(call(name)));
            assert_eq!(decide_edge(&msg), expected, "{}", name);
        }
    }

    #[test]
    fn test_tool_call_beats_marker() {
        let msg = Message::from(
            AssistantMessage::text("Moving to CheckAgent").with_tool_call(call("company_overview")),
        );
        assert_eq!(decide_edge(&msg), RoutingDecision::FinancialMetrics);
    }

    #[test]
    fn test_marker_and_default() {
        let check = Message::assistant("Moving to CheckAgent");
        assert_eq!(decide_edge(&check), RoutingDecision::CheckAgent);

        // marker only inside hidden reasoning does not count
        let hidden = Message::assistant("<think>maybe CheckAgent</think>\nDoing HybridSearch");
        assert_eq!(decide_edge(&hidden), RoutingDecision::HybridSearch);

        // unrecognized tool call falls through to the marker check
        let unknown = Message::from(
            AssistantMessage::text("Moving to CheckAgent").with_tool_call(call("expand_query")),
        );
        assert_eq!(decide_edge(&unknown), RoutingDecision::CheckAgent);

        assert_eq!(decide_edge(&Message::assistant("")), RoutingDecision::HybridSearch);
        assert_eq!(decide_edge(&Message::user("CheckAgent")), RoutingDecision::HybridSearch);
    }

    #[tokio::test]
    async fn test_route_binds_all_tools_and_windows_context() {
        let model = Arc::new(ScriptedModel::sequence(vec![AssistantMessage::text(
            "Doing HybridSearch",
        )]));
        let specs = create_default_registry(&Default::default()).unwrap().specs();
        let router = RouterNode::new(model.clone(), specs, 2);

        let mut state = ConversationState::from_user_query("first question");
        state.append(Message::assistant("older reply"));
        state.append(Message::user("What is IBM's P/E ratio?"));

        let reply = router.route(&state).await.unwrap();
        assert_eq!(reply.content, "Doing HybridSearch");

        let request = &model.requests()[0];
        assert_eq!(request.node, NODE_NAME);
        assert_eq!(request.tools.len(), 9);
        assert!(!request.has_tool("expand_query"));
        let prompt = request.prompt_text();
        assert!(prompt.contains("User Content: What is IBM's P/E ratio?"));
        assert!(!prompt.contains("first question"));
        assert!(control_tool_specs().iter().all(|s| !request.has_tool(&s.name)));
    }

    #[tokio::test]
    async fn test_route_model_failure_becomes_message() {
        let model = Arc::new(ScriptedModel::new(|_| {
            Err(OrchestrationError::Llm("503 overloaded".into()))
        }));
        let router = RouterNode::new(model, Vec::new(), 7);
        let state = ConversationState::from_user_query("q");

        let reply = router.route(&state).await.unwrap();
        assert!(reply.tool_calls.is_empty());
        assert_eq!(
            decide_edge(&Message::from(reply)),
            RoutingDecision::HybridSearch
        );

        let fatal = RouterNode::new(
            Arc::new(ScriptedModel::new(|_| {
                Err(OrchestrationError::Configuration("no key".into()))
            })),
            Vec::new(),
            7,
        );
        assert!(fatal.route(&state).await.is_err());
    }
}
