//! Query expansion
//!
//! Rewrites the current question into one sharper search query using the
//! session's own history. Earlier expansions are read back from the
//! conversation state, so nothing is shared between sessions.

use crate::context::{build_context, strip_reasoning};
use crate::error::OrchestrationError;
use crate::llm::{ChatModel, ModelRequest};
use crate::models::ToolResultMessage;
use crate::state::{ConversationState, EXPAND_QUERY_TOOL};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const NODE_NAME: &str = EXPAND_QUERY_TOOL;
pub const DEFAULT_EXPANSION_TEMPERATURE: f32 = 0.8;

/// Number of earlier expansions shown to the model as already tried.
const PREVIOUS_EXPANSIONS: usize = 3;

const EXPANSION_SYSTEM: &str = "You are a financial retrieval assistant. \
Write exactly one search query that retrieves the context needed to answer the user's question precisely. \
Use the whole conversation, including reasoning and tool output, to correct conceptual mistakes and maximise relevance.";

const EXPANSION_TASK: &str = "Find what is missing from the context above for answering the user's question and write one improved search query. \
Add or correct tickers, ISINs and financial terms only where their absence caused a wrong retrieval or a tool failure. \
Reply with the query alone, phrased as a question, with no explanation.";

/// Produce one refined query for the session. Fails with
/// `EmptyHistory` when there is nothing to refine.
pub async fn expand_query(
    model: &dyn ChatModel,
    state: &ConversationState,
    window: usize,
    temperature: f32,
) -> Result<String> {
    if state.is_empty() {
        return Err(OrchestrationError::EmptyHistory);
    }

    let mut task = format!(
        "RECENT CONVERSATION:\n{}\n\n{}",
        build_context(state, window),
        EXPANSION_TASK
    );

    let previous = state.previous_expansions(PREVIOUS_EXPANSIONS);
    if !previous.is_empty() {
        task.push_str("\n\nQueries already tried (do not repeat them):\n");
        for q in &previous {
            task.push_str(&format!("- {}\n", q));
        }
    }

    let request = ModelRequest::new(NODE_NAME)
        .system(EXPANSION_SYSTEM)
        .human(task)
        .temperature(temperature);

    let reply = model.invoke(&request).await?;
    let query = clean_query(&reply.content);

    if query.is_empty() {
        return Err(OrchestrationError::Llm(
            "query expansion returned an empty query".to_string(),
        ));
    }

    if let Some(current) = state.effective_query() {
        if current.trim().eq_ignore_ascii_case(&query) {
            return Err(OrchestrationError::Llm(
                "query expansion repeated the current query".to_string(),
            ));
        }
    }

    Ok(query)
}

fn clean_query(raw: &str) -> String {
    let stripped = strip_reasoning(raw);
    let trimmed = stripped.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Graph node wrapping [`expand_query`]. The result, or the failure, is
/// recorded as an `expand_query` tool result.
pub struct ExpansionNode {
    model: Arc<dyn ChatModel>,
    window: usize,
    temperature: f32,
}

impl ExpansionNode {
    pub fn new(model: Arc<dyn ChatModel>, window: usize, temperature: f32) -> Self {
        Self {
            model,
            window,
            temperature,
        }
    }

    pub async fn expand(&self, state: &ConversationState) -> Result<ToolResultMessage> {
        match expand_query(self.model.as_ref(), state, self.window, self.temperature).await {
            Ok(query) => {
                info!(query = %query, "query expanded");
                Ok(ToolResultMessage::success(
                    EXPAND_QUERY_TOOL,
                    None,
                    &Value::String(query),
                ))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "query expansion failed");
                Ok(ToolResultMessage::failure(EXPAND_QUERY_TOOL, None, &e))
            }
        }
    }
}
