//! Web search and encyclopedia lookup

use crate::error::OrchestrationError;
use crate::models::ToolCallRequest;
use crate::tools::{optional_f64, optional_str, require_str, Tool, ToolCategory, GOOGLE_SEARCH, WIKI_LOOKUP};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const DEFAULT_RESULT_COUNT: usize = 20;
const MAX_RESULT_COUNT: usize = 100;

//
// ================= Web search (Serper) =================
//

pub struct WebSearchTool {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    region: String,
    recency: String,
}

impl WebSearchTool {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        region: impl Into<String>,
        recency: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            region: region.into(),
            recency: recency.into(),
        }
    }

    /// Raw search results for `query`. The payload is passed through
    /// unchanged; a non-JSON body is returned as a string.
    pub async fn search(&self, query: &str, num_results: usize) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Configuration("SERPER_API_KEY not configured".to_string())
            })?;

        let body = json!({
            "q": query,
            "gl": self.region,
            "num": num_results.clamp(1, MAX_RESULT_COUNT),
            "tbs": self.recency,
        });

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestrationError::from_transport("web search", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrchestrationError::from_transport("web search", e))?;

        if !status.is_success() {
            return Err(OrchestrationError::Upstream(format!(
                "web search returned {}: {}",
                status, text
            )));
        }

        debug!(query = %query, bytes = text.len(), "web search completed");
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        GOOGLE_SEARCH
    }

    fn description(&self) -> &'static str {
        "Search the public web for recent news and facts. Results are restricted to the past week."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Web
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "num_results": {"type": "integer", "description": "Number of results, default 20"},
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
        let query = require_str(call, "query", 0)?;
        let num = optional_f64(call, "num_results", 1)?
            .filter(|n| *n >= 1.0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RESULT_COUNT);

        self.search(&query, num).await
    }
}

//
// ================= Encyclopedia (MediaWiki) =================
//

pub struct WikiLookupTool {
    client: Client,
    url_template: String,
}

#[derive(Debug, Deserialize)]
struct WikiResponse {
    #[serde(default)]
    query: Option<WikiQuery>,
}

#[derive(Debug, Deserialize)]
struct WikiQuery {
    #[serde(default)]
    pages: Map<String, Value>,
}

impl WikiLookupTool {
    pub fn new(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    fn endpoint(&self, language: &str) -> String {
        self.url_template.replace("{lang}", language)
    }

    /// Look `title` up in the `language` edition.
    ///
    /// Always yields a structured object: `{exists: true, page_id, title,
    /// summary, content_url}`, or `{exists: false, error}` when the page is
    /// missing or the request failed.
    pub async fn lookup(&self, title: &str, language: &str) -> Result<Value> {
        if language.is_empty()
            || language.len() > 12
            || !language.chars().all(|c| c.is_ascii_lowercase() || c == '-')
        {
            return Err(OrchestrationError::Validation(format!(
                "invalid language code '{}'",
                language
            )));
        }

        let request = self
            .client
            .get(self.endpoint(language))
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("prop", "extracts|info"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("inprop", "url"),
                ("redirects", "1"),
                ("titles", title),
            ]);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(title = %title, "wiki lookup failed: {}", e);
                return Ok(request_error(&e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(title = %title, %status, "wiki lookup returned an error status");
            return Ok(request_error(&format!("HTTP {}", status)));
        }

        let parsed: WikiResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return Ok(request_error(&format!("invalid response: {}", e))),
        };

        let page = parsed
            .query
            .and_then(|q| q.pages.into_iter().next().map(|(_, page)| page));

        Ok(match page {
            Some(page) if page.get("missing").is_none() && page.get("invalid").is_none() => {
                json!({
                    "exists": true,
                    "page_id": page.get("pageid").cloned().unwrap_or(Value::Null),
                    "title": page.get("title").and_then(|t| t.as_str()).unwrap_or(title),
                    "summary": page.get("extract").and_then(|t| t.as_str()).unwrap_or(""),
                    "content_url": page.get("fullurl").cloned().unwrap_or(Value::Null),
                })
            }
            _ => json!({
                "exists": false,
                "error": format!("PageError: The page titled '{}' does not exist.", title),
            }),
        })
    }
}

fn request_error(detail: &str) -> Value {
    json!({
        "exists": false,
        "error": format!("RequestError: {}", detail),
    })
}

#[async_trait]
impl Tool for WikiLookupTool {
    fn name(&self) -> &'static str {
        WIKI_LOOKUP
    }

    fn description(&self) -> &'static str {
        "Look up an encyclopedia article by title and return its introductory summary and URL."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Web
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Article title"},
                "language": {"type": "string", "description": "Language edition, default \"en\""},
            },
            "required": ["title"],
        })
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
        let title = require_str(call, "title", 0)?;
        let language = optional_str(call, "language", 1).unwrap_or_else(|| "en".to_string());
        self.lookup(&title, &language).await
    }
}
