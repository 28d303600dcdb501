//! Gemini API client
//!
//! Sends prompts with optional function declarations and maps the reply
//! (text, thought and functionCall parts) onto an `AssistantMessage`.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::llm::{ChatModel, ModelRequest, PromptMessage};
use crate::models::{AssistantMessage, ToolCallRequest};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_TEMPERATURE: f32 = 0.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Reusable Gemini client (connection-pooled)
pub struct GeminiModel {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiModel {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: crate::config::DEFAULT_GEMINI_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(config.gemini_api_key.clone(), config.model_name.clone())?
            .with_base_url(config.gemini_base_url.clone()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<AssistantMessage> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Configuration("GEMINI_API_KEY not configured".to_string())
            })?;

        let body = build_request(request);

        debug!(node = request.node, tools = request.tools.len(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::Llm(format!("Gemini API request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    OrchestrationError::Configuration(format!(
                        "Gemini rejected the configured credential: {}",
                        error_text
                    ))
                }
                _ => OrchestrationError::Llm(format!("Gemini API error {}: {}", status, error_text)),
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let reply = parse_response(gemini_response)?;

        info!(
            node = request.node,
            tool_calls = reply.tool_calls.len(),
            "Gemini response received"
        );

        Ok(reply)
    }
}

fn build_request(request: &ModelRequest) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in &request.messages {
        match message {
            PromptMessage::System(text) => system_parts.push(Part::text(text)),
            PromptMessage::Human(text) => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }),
        }
    }

    // The API rejects a request without user content.
    if contents.is_empty() {
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part::text("Proceed.")],
        });
    }

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: request
                .tools
                .iter()
                .map(|spec| FunctionDeclaration {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: declared_parameters(&spec.parameters),
                })
                .collect(),
        }]
    };

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
        },
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(SystemInstruction {
                parts: system_parts,
            })
        },
        tools,
    }
}

/// Gemini rejects an OBJECT schema without properties, so argument-less
/// tools are declared with no schema at all.
fn declared_parameters(schema: &Value) -> Option<Value> {
    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .map_or(false, |p| !p.is_empty());

    has_properties.then(|| schema.clone())
}

fn parse_response(response: GeminiResponse) -> Result<AssistantMessage> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::Llm("No response from Gemini API".to_string()))?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    if parts.is_empty() {
        return Err(OrchestrationError::Llm(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(call) = part.function_call {
            let mut request = ToolCallRequest::new(call.name);
            request.kwargs = call.args;
            tool_calls.push(request);
        } else if let Some(t) = part.text {
            if part.thought {
                reasoning.push_str(&t);
            } else {
                text.push_str(&t);
            }
        }
    }

    Ok(AssistantMessage {
        content: text,
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        tool_calls,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}
