//! Hybrid search over the private document index
//!
//! The index itself lives behind the [`Retriever`] trait: an HTTP retrieval
//! service in production, or an in-process keyword index.

use crate::error::OrchestrationError;
use crate::models::ToolCallRequest;
use crate::tools::{require_str, Tool, ToolCategory, HYBRID_SEARCH};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A text chunk with its relevance score and source metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Fragment {
    /// Flat `{text, score, ...metadata}` object handed to the model.
    pub fn to_json(&self) -> Value {
        let mut object = self.metadata.clone();
        object.insert("text".to_string(), Value::String(self.text.clone()));
        object.insert("score".to_string(), json!(self.score));
        Value::Object(object)
    }
}

/// Trait for document index backends
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fragments most relevant to `query`, best first. An empty index yields
    /// an empty list, not an error.
    async fn retrieve(&self, query: &str) -> Result<Vec<Fragment>>;
}

// =============================
// HTTP retrieval service
// =============================

pub struct HttpRetriever {
    client: Client,
    base_url: String,
    top_k: usize,
}

impl HttpRetriever {
    pub fn new(client: Client, base_url: impl Into<String>, top_k: usize) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            top_k,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Bare(Vec<Fragment>),
    Wrapped { results: Vec<Fragment> },
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Fragment>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({"query": query, "k": self.top_k}))
            .send()
            .await
            .map_err(|e| OrchestrationError::from_transport("retrieval request", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Upstream(format!(
                "retrieval service returned {}: {}",
                status, body
            )));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            OrchestrationError::Upstream(format!("invalid retrieval response: {}", e))
        })?;

        let mut fragments = match parsed {
            SearchResponse::Bare(f) | SearchResponse::Wrapped { results: f } => f,
        };
        fragments.truncate(self.top_k);
        Ok(fragments)
    }
}

// =============================
// In-process keyword index
// =============================

/// Term-overlap ranking over documents held in memory. Starts empty.
pub struct KeywordRetriever {
    documents: Vec<(String, Map<String, Value>)>,
    top_k: usize,
}

impl KeywordRetriever {
    pub fn new(top_k: usize) -> Self {
        Self {
            documents: Vec::new(),
            top_k,
        }
    }

    pub fn with_document(mut self, text: impl Into<String>, metadata: Map<String, Value>) -> Self {
        self.add_document(text, metadata);
        self
    }

    pub fn add_document(&mut self, text: impl Into<String>, metadata: Map<String, Value>) {
        self.documents.push((text.into(), metadata));
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Fragment>> {
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Fragment> = self
            .documents
            .iter()
            .filter_map(|(text, metadata)| {
                let doc_terms = terms(text);
                if doc_terms.is_empty() {
                    return None;
                }
                let hits = doc_terms.iter().filter(|t| query_terms.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                Some(Fragment {
                    text: text.clone(),
                    score: hits as f64 / (doc_terms.len() as f64).sqrt(),
                    metadata: metadata.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.top_k);
        Ok(scored)
    }
}

// =============================
// Tool
// =============================

pub struct HybridSearchTool {
    retriever: Arc<dyn Retriever>,
}

impl HybridSearchTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Fragment>> {
        let fragments = self.retriever.retrieve(query).await?;
        debug!(query = %query, hits = fragments.len(), "hybrid search completed");
        Ok(fragments)
    }
}

#[async_trait]
impl Tool for HybridSearchTool {
    fn name(&self) -> &'static str {
        HYBRID_SEARCH
    }

    fn description(&self) -> &'static str {
        "Search the private document index (annual reports, filings, research notes) combining keyword and semantic relevance."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Hybrid
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
        let query = require_str(call, "query", 0)?;
        let fragments = self.search(&query).await?;
        Ok(Value::Array(fragments.iter().map(Fragment::to_json).collect()))
    }
}
