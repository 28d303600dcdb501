//! Dispatch engine
//!
//! Executes the tool calls requested by the router within one category.
//! Every call yields exactly one `ToolResultMessage`; tool failures never
//! escape as errors.

use crate::error::OrchestrationError;
use crate::models::{Message, ToolCallRequest, ToolResultMessage};
use crate::state::ConversationState;
use crate::tools::{ToolCategory, ToolRegistry, ToolSpec, HYBRID_SEARCH};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Audit tag of the dispatch node for `category`.
pub fn dispatch_node_name(category: ToolCategory) -> &'static str {
    match category {
        ToolCategory::Hybrid => "hybrid_node",
        ToolCategory::Web => "web_node",
        ToolCategory::Financial => "fin_node",
    }
}

pub struct DispatchEngine {
    tool_registry: ToolRegistry,
    timeout: Duration,
}

impl DispatchEngine {
    pub fn new(tool_registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            tool_registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.tool_registry
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tool_registry.specs()
    }

    /// Run the calls of the latest assistant message that belong to `category`,
    /// in request order. Calls for another category get an error result.
    /// Hybrid dispatch always searches: without a `hybrid_search` call, one is
    /// added for the effective query.
    pub async fn dispatch(
        &self,
        category: ToolCategory,
        state: &ConversationState,
    ) -> Vec<ToolResultMessage> {
        let mut calls: Vec<ToolCallRequest> = match state.last() {
            Some(Message::Assistant(reply)) => reply.tool_calls.clone(),
            _ => Vec::new(),
        };

        // router fell back to document search without naming the tool
        if category == ToolCategory::Hybrid && !calls.iter().any(|c| c.name == HYBRID_SEARCH) {
            if let Some(query) = state.effective_query() {
                debug!(query, "adding fallback hybrid_search call");
                calls.push(ToolCallRequest::new(HYBRID_SEARCH).with_kwarg("query", query));
            }
        }

        if calls.is_empty() {
            warn!(?category, "dispatch reached without a tool call");
            let err = OrchestrationError::InvalidToolInput(
                "no tool call was requested for this step".to_string(),
            );
            return vec![ToolResultMessage::failure(
                dispatch_node_name(category),
                None,
                &err,
            )];
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            results.push(self.execute_call(category, call).await);
        }

        info!(
            node = dispatch_node_name(category),
            calls = calls.len(),
            failures = results.iter().filter(|r| r.error.is_some()).count(),
            "dispatch complete"
        );

        results
    }

    async fn execute_call(&self, category: ToolCategory, call: &ToolCallRequest) -> ToolResultMessage {
        let call_id = Some(call.id.clone());

        // -------------------------------------------------
        // TOOL LOOKUP
        // -------------------------------------------------
        let tool = match self.tool_registry.get(&call.name) {
            Some(tool) => tool,
            None => {
                warn!(tool_name = %call.name, "tool not registered");
                let err = OrchestrationError::UnknownTool(call.name.clone());
                return ToolResultMessage::failure(call.name.clone(), call_id, &err);
            }
        };

        if tool.category() != category {
            warn!(
                tool_name = %call.name,
                ?category,
                "tool belongs to another dispatch category"
            );
            let err = OrchestrationError::InvalidToolInput(format!(
                "{} is not available in this step",
                call.name
            ));
            return ToolResultMessage::failure(call.name.clone(), call_id, &err);
        }

        // -------------------------------------------------
        // BOUNDED EXECUTION
        // -------------------------------------------------
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, tool.execute(call)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(payload)) => {
                debug!(tool_name = %call.name, elapsed_ms, "tool succeeded");
                ToolResultMessage::success(call.name.clone(), call_id, &payload)
            }
            Ok(Err(e)) => {
                warn!(tool_name = %call.name, error = %e, elapsed_ms, "tool failed");
                ToolResultMessage::failure(call.name.clone(), call_id, &e)
            }
            Err(_) => {
                warn!(tool_name = %call.name, elapsed_ms, "tool timed out");
                let err = OrchestrationError::Upstream(format!(
                    "{} timed out after {}s",
                    call.name,
                    self.timeout.as_secs_f64()
                ));
                ToolResultMessage::failure(call.name.clone(), call_id, &err)
            }
        }
    }
}
