//! Company fundamentals (Alpha Vantage OVERVIEW)

use crate::error::OrchestrationError;
use crate::models::ToolCallRequest;
use crate::tools::{require_str, Tool, ToolCategory, COMPANY_OVERVIEW};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Keys the provider uses to signal a rejected request inside a 200 body.
const ENVELOPE_ERROR_KEYS: [&str; 3] = ["Error Message", "Note", "Information"];

pub struct CompanyOverviewTool {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CompanyOverviewTool {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Key/value fundamentals for `symbol` (e.g. `PERatio`, `MarketCapitalization`).
    pub async fn overview(&self, symbol: &str) -> Result<Map<String, Value>> {
        let symbol = normalize_symbol(symbol)?;
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Configuration("ALPHAVANTAGE_API_KEY not configured".to_string())
            })?;

        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", "OVERVIEW"),
                ("symbol", symbol.as_str()),
                ("apikey", api_key),
            ])
            .send()
            .await
            .map_err(|e| OrchestrationError::from_transport("fundamentals request", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Upstream(format!(
                "fundamentals provider returned {} for {}: {}",
                status, symbol, body
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            OrchestrationError::Upstream(format!("invalid fundamentals response for {}: {}", symbol, e))
        })?;

        let Value::Object(fields) = body else {
            return Err(OrchestrationError::Upstream(format!(
                "unexpected fundamentals payload for {}",
                symbol
            )));
        };

        if let Some((key, message)) = ENVELOPE_ERROR_KEYS
            .iter()
            .find_map(|k| fields.get(*k).map(|m| (*k, m)))
        {
            warn!(symbol = %symbol, "fundamentals provider rejected request ({})", key);
            return Err(OrchestrationError::Upstream(format!(
                "fundamentals provider rejected {}: {}",
                symbol, message
            )));
        }

        if fields.is_empty() {
            return Err(OrchestrationError::Upstream(format!(
                "no fundamentals found for {}",
                symbol
            )));
        }

        debug!(symbol = %symbol, fields = fields.len(), "fundamentals retrieved");
        Ok(fields)
    }
}

/// Upper-cased ticker of 1-10 characters from `[A-Z0-9.-]`.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 10
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');

    if valid {
        Ok(symbol)
    } else {
        Err(OrchestrationError::Validation(format!(
            "'{}' is not a valid ticker symbol",
            symbol
        )))
    }
}

#[async_trait]
impl Tool for CompanyOverviewTool {
    fn name(&self) -> &'static str {
        COMPANY_OVERVIEW
    }

    fn description(&self) -> &'static str {
        "Fetch company fundamentals for a ticker: valuation ratios (PERatio, PEGRatio), market capitalization, EPS, dividend yield, sector and description."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Financial
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "description": "Ticker symbol, e.g. IBM"}
            },
            "required": ["symbol"],
        })
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
        let symbol = require_str(call, "symbol", 0)?;
        Ok(Value::Object(self.overview(&symbol).await?))
    }
}
