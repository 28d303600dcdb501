//! Orchestration graph - drives one session to its answer
//!
//! START → ROUTING → DISPATCH → VERIFYING → (EXPANDING → ROUTING)* → ANSWERING → END
//!
//! Nodes return the messages they produced; only the driver appends them to
//! the session. Every node execution counts against the recursion limit.

use crate::answer::{display_answer, AnswerNode};
use crate::audit::{compute_history_hash, AuditLog};
use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::execution::{dispatch_node_name, DispatchEngine};
use crate::expansion::ExpansionNode;
use crate::llm::{ChatModel, GeminiModel};
use crate::models::{Message, RoutingDecision, SessionOutcome, VerificationDecision};
use crate::router::{decide_edge, RouterNode};
use crate::state::ConversationState;
use crate::tools::{create_default_registry, ToolCategory};
use crate::verification::{decide_verification, VerificationNode};
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Audit tag for user input entering the graph.
pub const INPUT_NODE_NAME: &str = "input_query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GraphNode {
    Start,
    Routing,
    DispatchHybrid,
    DispatchWeb,
    DispatchFinancial,
    Verifying,
    Expanding,
    Answering,
    Terminal,
}

impl GraphNode {
    /// Name used for audit records.
    pub fn name(&self) -> &'static str {
        match self {
            GraphNode::Start => "start",
            GraphNode::Routing => crate::router::NODE_NAME,
            GraphNode::DispatchHybrid => dispatch_node_name(ToolCategory::Hybrid),
            GraphNode::DispatchWeb => dispatch_node_name(ToolCategory::Web),
            GraphNode::DispatchFinancial => dispatch_node_name(ToolCategory::Financial),
            GraphNode::Verifying => crate::verification::NODE_NAME,
            GraphNode::Expanding => crate::expansion::NODE_NAME,
            GraphNode::Answering => crate::answer::NODE_NAME,
            GraphNode::Terminal => "end",
        }
    }

    pub fn for_routing(decision: RoutingDecision) -> GraphNode {
        match decision {
            RoutingDecision::FinancialMetrics => GraphNode::DispatchFinancial,
            RoutingDecision::Wikipedia | RoutingDecision::WebSearch => GraphNode::DispatchWeb,
            RoutingDecision::HybridSearch => GraphNode::DispatchHybrid,
            RoutingDecision::CheckAgent => GraphNode::Verifying,
        }
    }

    fn dispatch_category(&self) -> Option<ToolCategory> {
        match self {
            GraphNode::DispatchHybrid => Some(ToolCategory::Hybrid),
            GraphNode::DispatchWeb => Some(ToolCategory::Web),
            GraphNode::DispatchFinancial => Some(ToolCategory::Financial),
            _ => None,
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transition function of the graph. `last` is the newest message in the
/// session after `current` ran.
pub fn next_node(current: GraphNode, last: Option<&Message>) -> GraphNode {
    match current {
        GraphNode::Start => GraphNode::Routing,
        GraphNode::Routing => match last {
            Some(message) => GraphNode::for_routing(decide_edge(message)),
            None => GraphNode::DispatchHybrid,
        },
        GraphNode::DispatchHybrid | GraphNode::DispatchWeb | GraphNode::DispatchFinancial => {
            GraphNode::Verifying
        }
        GraphNode::Verifying => match last.map(decide_verification) {
            Some(VerificationDecision::Expand) => GraphNode::Expanding,
            _ => GraphNode::Answering,
        },
        GraphNode::Expanding => GraphNode::Routing,
        GraphNode::Answering | GraphNode::Terminal => GraphNode::Terminal,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Maximum node executions per run.
    pub recursion_limit: usize,
    pub context_window: usize,
    pub expansion_temperature: f32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            recursion_limit: crate::config::DEFAULT_RECURSION_LIMIT,
            context_window: crate::context::DEFAULT_CONTEXT_WINDOW,
            expansion_temperature: crate::expansion::DEFAULT_EXPANSION_TEMPERATURE,
        }
    }
}

impl From<&AgentConfig> for OrchestratorSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            recursion_limit: config.recursion_limit,
            context_window: config.context_window,
            expansion_temperature: config.expansion_temperature,
        }
    }
}

/// Main orchestrator that coordinates the entire workflow
pub struct Orchestrator {
    router: RouterNode,
    dispatcher: DispatchEngine,
    verifier: VerificationNode,
    expander: ExpansionNode,
    answerer: AnswerNode,
    audit_log: Arc<AuditLog>,
    recursion_limit: usize,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        dispatcher: DispatchEngine,
        audit_log: Arc<AuditLog>,
        settings: OrchestratorSettings,
    ) -> Self {
        let router = RouterNode::new(
            Arc::clone(&model),
            dispatcher.tool_specs(),
            settings.context_window,
        );

        Self {
            router,
            verifier: VerificationNode::new(Arc::clone(&model), settings.context_window),
            expander: ExpansionNode::new(
                Arc::clone(&model),
                settings.context_window,
                settings.expansion_temperature,
            ),
            answerer: AnswerNode::new(model),
            dispatcher,
            audit_log,
            recursion_limit: settings.recursion_limit,
        }
    }

    /// Gemini model, the default tool registry and a file-backed audit log.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::new(GeminiModel::from_config(config)?);
        let dispatcher = DispatchEngine::new(create_default_registry(config)?, config.tool_timeout);
        let audit_log = Arc::new(AuditLog::new(config.audit_log_path.clone()));

        Ok(Self::new(model, dispatcher, audit_log, config.into()))
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    /// Record a new user message and run the graph on it.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        input: &str,
    ) -> Result<SessionOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Err(OrchestrationError::Validation(
                "user message must not be empty".to_string(),
            ));
        }

        let message = Message::user(input);
        self.audit(state, 0, INPUT_NODE_NAME, &message).await;
        state.append(message);

        self.run(state).await
    }

    /// Run the unified orchestration loop until the answer node completes.
    pub async fn run(&self, state: &mut ConversationState) -> Result<SessionOutcome> {
        if !state.has_user_message() {
            return Err(OrchestrationError::EmptyHistory);
        }

        let session_id = state.session_id();
        let initial_len = state.len();
        let mut node = GraphNode::Start;
        let mut steps = 0usize;
        let mut path = Vec::new();
        let mut answer = None;

        info!(%session_id, messages = initial_len, "Orchestrator: starting run");

        loop {
            node = next_node(node, state.last());
            if node == GraphNode::Terminal {
                break;
            }

            if steps >= self.recursion_limit {
                error!(
                    %session_id,
                    limit = self.recursion_limit,
                    path = ?path,
                    "recursion limit reached"
                );
                return Err(OrchestrationError::RecursionLimitExceeded {
                    limit: self.recursion_limit,
                });
            }
            steps += 1;
            path.push(node);

            debug!(%session_id, step = steps, node = %node, "executing node");

            let delta = self.execute_node(node, state).await?;

            for message in &delta {
                self.audit(state, steps, node.name(), message).await;
            }

            if node == GraphNode::Answering {
                if let Some(Message::Assistant(reply)) = delta.last() {
                    answer = Some(display_answer(reply));
                }
            }

            state.extend(delta);
        }

        let appended = state.len() - initial_len;
        info!(%session_id, steps, appended, "Orchestrator: run complete");

        Ok(SessionOutcome {
            session_id,
            answer: answer.unwrap_or_default(),
            steps,
            appended,
            path,
        })
    }

    async fn execute_node(
        &self,
        node: GraphNode,
        state: &ConversationState,
    ) -> Result<Vec<Message>> {
        if let Some(category) = node.dispatch_category() {
            let results = self.dispatcher.dispatch(category, state).await;
            return Ok(results.into_iter().map(Message::from).collect());
        }

        let message = match node {
            GraphNode::Routing => Message::from(self.router.route(state).await?),
            GraphNode::Verifying => Message::from(self.verifier.verify(state).await?),
            GraphNode::Expanding => Message::from(self.expander.expand(state).await?),
            GraphNode::Answering => Message::from(self.answerer.answer(state).await?),
            _ => return Ok(Vec::new()),
        };

        Ok(vec![message])
    }

    async fn audit(&self, state: &ConversationState, step: usize, node: &str, message: &Message) {
        let hash = compute_history_hash(state);
        if let Err(e) = self
            .audit_log
            .record_node(state.session_id(), step, node, message, &hash)
            .await
        {
            warn!(node, error = %e, "failed to write audit record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::{AssistantMessage, ToolCallRequest};
    use crate::tools::{MetricKind, MetricTool, ToolRegistry};
    use serde_json::json;
    use std::time::Duration;

    fn reply_with(name: &str) -> AssistantMessage {
        AssistantMessage::text("").with_tool_call(ToolCallRequest::new(name))
    }

    fn orchestrator(model: ScriptedModel, limit: usize) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MetricTool::new(MetricKind::MaxDrawdown)));
        let settings = OrchestratorSettings {
            recursion_limit: limit,
            ..Default::default()
        };
        Orchestrator::new(
            Arc::new(model),
            DispatchEngine::new(registry, Duration::from_secs(1)),
            Arc::new(AuditLog::in_memory()),
            settings,
        )
    }

    #[test]
    fn test_transitions() {
        let fin = Message::from(reply_with("max_drawdown"));
        let check = Message::assistant("Moving to CheckAgent");
        let expand = Message::from(reply_with("expand_query"));

        assert_eq!(next_node(GraphNode::Start, None), GraphNode::Routing);
        assert_eq!(next_node(GraphNode::Routing, Some(&fin)), GraphNode::DispatchFinancial);
        assert_eq!(next_node(GraphNode::Routing, Some(&check)), GraphNode::Verifying);
        assert_eq!(next_node(GraphNode::DispatchWeb, None), GraphNode::Verifying);
        assert_eq!(next_node(GraphNode::Verifying, Some(&expand)), GraphNode::Expanding);
        assert_eq!(next_node(GraphNode::Verifying, Some(&check)), GraphNode::Answering);
        assert_eq!(next_node(GraphNode::Expanding, None), GraphNode::Routing);
        assert_eq!(next_node(GraphNode::Answering, None), GraphNode::Terminal);
    }

    #[tokio::test]
    async fn test_run_without_user_message_fails() {
        let orch = orchestrator(ScriptedModel::sequence(Vec::new()), 50);
        let err = orch.run(&mut ConversationState::new()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::EmptyHistory));
    }

    #[tokio::test]
    async fn test_check_agent_shortcut_path() {
        let model = ScriptedModel::sequence(vec![
            AssistantMessage::text("Moving to CheckAgent"),
            reply_with("answer_query"),
            AssistantMessage::text("Max drawdown was -5%."),
        ]);
        let orch = orchestrator(model, 50);
        let mut state = ConversationState::new();

        let outcome = orch.run_turn(&mut state, "What was the drawdown?").await.unwrap();

        assert_eq!(
            outcome.path,
            vec![GraphNode::Routing, GraphNode::Verifying, GraphNode::Answering]
        );
        assert_eq!(outcome.appended, 3);
        assert_eq!(outcome.answer, "Max drawdown was -5%.");
        // input record plus one per node
        assert_eq!(orch.audit_log().records().await.len(), 4);
    }

    #[tokio::test]
    async fn test_dispatch_path_appends_tool_result() {
        let model = ScriptedModel::sequence(vec![
            AssistantMessage::text("Calling FinancialMetrics").with_tool_call(
                ToolCallRequest::new("max_drawdown").with_kwarg("returns", json!([0.1, -0.05])),
            ),
            reply_with("answer_query"),
            AssistantMessage::text("done"),
        ]);
        let orch = orchestrator(model, 50);
        let mut state = ConversationState::from_user_query("drawdown of 10% then -5%?");

        let outcome = orch.run(&mut state).await.unwrap();

        assert_eq!(outcome.appended, 4);
        assert_eq!(outcome.steps, 4);
        assert!(matches!(&state.messages()[2], Message::ToolResult(t) if t.tool_name == "max_drawdown"));
    }

    #[tokio::test]
    async fn test_recursion_limit_is_fatal() {
        let model = ScriptedModel::new(|request| {
            Ok(match request.node {
                crate::router::NODE_NAME => AssistantMessage::text("Moving to CheckAgent"),
                crate::verification::NODE_NAME => reply_with("expand_query"),
                _ => AssistantMessage::text(format!("query {}", uuid::Uuid::new_v4())),
            })
        });
        let orch = orchestrator(model, 10);
        let mut state = ConversationState::from_user_query("loop forever");

        let err = orch.run(&mut state).await.unwrap_err();

        assert!(matches!(err, OrchestrationError::RecursionLimitExceeded { limit: 10 }));
        assert!(err.is_fatal());
        assert_eq!(state.len(), 11);
    }

    #[tokio::test]
    async fn test_recursion_limit_counts_per_turn() {
        let model = ScriptedModel::new(|request| {
            Ok(match request.node {
                crate::router::NODE_NAME => AssistantMessage::text("Moving to CheckAgent"),
                crate::verification::NODE_NAME => reply_with("answer_query"),
                _ => AssistantMessage::text("answered"),
            })
        });
        let orch = orchestrator(model, 3);
        let mut state = ConversationState::new();

        // three nodes per turn: a session-wide budget of 3 would fail the second turn
        for question in ["IBM dividend?", "And MSFT?"] {
            let outcome = orch.run_turn(&mut state, question).await.unwrap();
            assert_eq!(outcome.steps, 3);
        }
        assert_eq!(state.len(), 8);
    }

    #[tokio::test]
    async fn test_answer_model_outage_still_ends_with_answer() {
        let model = ScriptedModel::new(|request| match request.node {
            crate::router::NODE_NAME => Ok(AssistantMessage::text("Moving to CheckAgent")),
            crate::verification::NODE_NAME => Ok(reply_with("answer_query")),
            _ => Err(OrchestrationError::Llm("503 overloaded".into())),
        });
        let orch = orchestrator(model, 50);
        let mut state = ConversationState::from_user_query("What is IBM's P/E ratio?");

        let outcome = orch.run(&mut state).await.unwrap();

        assert_eq!(
            outcome.path,
            vec![GraphNode::Routing, GraphNode::Verifying, GraphNode::Answering]
        );
        assert_eq!(outcome.appended, 3);
        assert!(outcome.answer.contains("could not produce an answer"));
        assert!(matches!(state.last(), Some(Message::Assistant(_))));
    }
}
