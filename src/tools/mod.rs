//! Tool trait and registry
//!
//! Capability tools are independently invocable operations with a declared
//! input schema. Each belongs to exactly one dispatch category.

use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::models::ToolCallRequest;
use crate::state::EXPAND_QUERY_TOOL;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod fundamentals;
pub mod metrics;
pub mod retrieval;
pub mod web;

pub use fundamentals::CompanyOverviewTool;
pub use metrics::{MetricKind, MetricTool};
pub use retrieval::{Fragment, HttpRetriever, HybridSearchTool, KeywordRetriever, Retriever};
pub use web::{WebSearchTool, WikiLookupTool};

pub const HYBRID_SEARCH: &str = "hybrid_search";
pub const GOOGLE_SEARCH: &str = "google_search";
pub const WIKI_LOOKUP: &str = "wiki_lookup";
pub const COMPANY_OVERVIEW: &str = "company_overview";
pub const ANSWER_QUERY: &str = "answer_query";

/// Declaration of a tool as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Dispatch node a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCategory {
    Hybrid,
    Web,
    Financial,
}

/// Trait for a single capability tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn category(&self) -> ToolCategory;
    /// JSON schema of the named arguments.
    fn parameters(&self) -> Value;
    async fn execute(&self, call: &ToolCallRequest) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.parameters())
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        self.tools.get(name).map(|t| t.category())
    }

    /// Declarations of every registered tool, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Declarations bound to the verification model. These are not executed
/// through the registry: the graph itself carries out expansion and answering.
pub fn control_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            EXPAND_QUERY_TOOL,
            "Craft one optimized search query when the user's query is ambiguous, factually incorrect, or missing key details such as company names, tickers or dates.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolSpec::new(
            ANSWER_QUERY,
            "Produce the final answer when the retrieved content fully addresses the user's information needs.",
            json!({"type": "object", "properties": {}}),
        ),
    ]
}

/// Shared HTTP client for network-facing tools, bounded by `timeout`.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .build()?)
}

pub(crate) fn require_str(call: &ToolCallRequest, name: &str, position: usize) -> Result<String> {
    call.arg(name, position)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            OrchestrationError::InvalidToolInput(format!(
                "{} expects a non-empty '{}' argument",
                call.name, name
            ))
        })
}

pub(crate) fn optional_str(call: &ToolCallRequest, name: &str, position: usize) -> Option<String> {
    call.arg(name, position)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Numeric argument; numbers encoded as strings are accepted.
pub(crate) fn optional_f64(call: &ToolCallRequest, name: &str, position: usize) -> Result<Option<f64>> {
    match call.arg(name, position) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => number_from(value).map(Some).ok_or_else(|| {
            OrchestrationError::Validation(format!("'{}' must be a number, got {}", name, value))
        }),
    }
}

/// Numeric series argument: a JSON array, or a string holding one.
pub(crate) fn number_series(call: &ToolCallRequest, name: &str, position: usize) -> Result<Vec<f64>> {
    let value = call.arg(name, position).ok_or_else(|| {
        OrchestrationError::InvalidToolInput(format!("{} expects a '{}' series", call.name, name))
    })?;

    let parsed;
    let items = match value {
        Value::Array(items) => items,
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).map_err(|_| {
                OrchestrationError::Validation(format!("'{}' is not a numeric series", name))
            })?;
            parsed.as_array().ok_or_else(|| {
                OrchestrationError::Validation(format!("'{}' is not a numeric series", name))
            })?
        }
        other => {
            return Err(OrchestrationError::Validation(format!(
                "'{}' must be a list of numbers, got {}",
                name, other
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            number_from(item).ok_or_else(|| {
                OrchestrationError::Validation(format!(
                    "'{}' contains a non-numeric value: {}",
                    name, item
                ))
            })
        })
        .collect()
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Create the default registry: retrieval, web, encyclopedia, fundamentals
/// and every metric calculator.
pub fn create_default_registry(config: &AgentConfig) -> Result<ToolRegistry> {
    let client = http_client(config.tool_timeout)?;
    let mut registry = ToolRegistry::new();

    let retriever: Arc<dyn Retriever> = match &config.retrieval_base_url {
        Some(base_url) => Arc::new(HttpRetriever::new(
            client.clone(),
            base_url.clone(),
            config.retrieval_top_k,
        )),
        None => Arc::new(KeywordRetriever::new(config.retrieval_top_k)),
    };
    registry.register(Arc::new(HybridSearchTool::new(retriever)));

    registry.register(Arc::new(WebSearchTool::new(
        client.clone(),
        config.serper_base_url.clone(),
        config.serper_api_key.clone(),
        config.web_search_region.clone(),
        config.web_search_recency.clone(),
    )));
    registry.register(Arc::new(WikiLookupTool::new(
        client.clone(),
        config.wikipedia_url_template.clone(),
    )));

    registry.register(Arc::new(CompanyOverviewTool::new(
        client,
        config.alphavantage_base_url.clone(),
        config.alphavantage_api_key.clone(),
    )));
    for kind in MetricKind::ALL {
        registry.register(Arc::new(MetricTool::new(kind)));
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_all_capabilities() {
        let registry = create_default_registry(&AgentConfig::default()).unwrap();

        assert_eq!(
            registry.list(),
            vec![
                HYBRID_SEARCH,
                GOOGLE_SEARCH,
                WIKI_LOOKUP,
                COMPANY_OVERVIEW,
                "sharpe_ratio",
                "batting_average",
                "capture_ratios",
                "tracking_error",
                "max_drawdown",
            ]
        );
        assert_eq!(registry.category_of(HYBRID_SEARCH), Some(ToolCategory::Hybrid));
        assert_eq!(registry.category_of(WIKI_LOOKUP), Some(ToolCategory::Web));
        assert_eq!(registry.category_of("max_drawdown"), Some(ToolCategory::Financial));
        assert_eq!(registry.category_of("expand_query"), None);
        assert_eq!(registry.specs().len(), 9);
    }

    #[test]
    fn test_series_argument_parsing() {
        let call = ToolCallRequest::new("tracking_error")
            .with_kwarg("port", json!([0.1, "0.2", 3]))
            .with_kwarg("bench", json!("[0.1, 0.05, 1]"))
            .with_kwarg("bad", json!(["x"]));

        assert_eq!(number_series(&call, "port", 0).unwrap(), vec![0.1, 0.2, 3.0]);
        assert_eq!(number_series(&call, "bench", 1).unwrap(), vec![0.1, 0.05, 1.0]);
        assert!(matches!(
            number_series(&call, "bad", 9),
            Err(OrchestrationError::Validation(_))
        ));
        assert!(matches!(
            number_series(&call, "missing", 9),
            Err(OrchestrationError::InvalidToolInput(_))
        ));
    }

    #[test]
    fn test_control_specs() {
        let names: Vec<String> = control_tool_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["expand_query", "answer_query"]);
    }
}
