//! Runtime configuration
//!
//! Loaded from the process environment. Binaries call `dotenv::dotenv()`
//! first so a local `.env` file is honoured.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SERPER_BASE_URL: &str = "https://google.serper.dev";
pub const DEFAULT_WIKIPEDIA_URL_TEMPLATE: &str = "https://{lang}.wikipedia.org/w/api.php";
pub const DEFAULT_ALPHAVANTAGE_BASE_URL: &str = "https://www.alphavantage.co";
pub const DEFAULT_AUDIT_LOG_PATH: &str = "check_agent_log.json";
pub const DEFAULT_RECURSION_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: Option<String>,
    pub model_name: String,
    pub gemini_base_url: String,

    pub serper_api_key: Option<String>,
    pub serper_base_url: String,
    pub web_search_region: String,
    pub web_search_recency: String,

    /// `{lang}` is replaced by the requested language code.
    pub wikipedia_url_template: String,

    pub alphavantage_api_key: Option<String>,
    pub alphavantage_base_url: String,

    pub retrieval_base_url: Option<String>,
    pub retrieval_top_k: usize,

    pub audit_log_path: PathBuf,
    pub recursion_limit: usize,
    pub context_window: usize,
    pub tool_timeout: Duration,
    pub expansion_temperature: f32,
    pub port: u16,
    pub session_idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model_name: DEFAULT_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            serper_api_key: None,
            serper_base_url: DEFAULT_SERPER_BASE_URL.to_string(),
            web_search_region: "in".to_string(),
            web_search_recency: "qdr:w".to_string(),
            wikipedia_url_template: DEFAULT_WIKIPEDIA_URL_TEMPLATE.to_string(),
            alphavantage_api_key: None,
            alphavantage_base_url: DEFAULT_ALPHAVANTAGE_BASE_URL.to_string(),
            retrieval_base_url: None,
            retrieval_top_k: 5,
            audit_log_path: PathBuf::from(DEFAULT_AUDIT_LOG_PATH),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            context_window: crate::context::DEFAULT_CONTEXT_WINDOW,
            tool_timeout: Duration::from_secs(10),
            expansion_temperature: 0.8,
            port: 8080,
            session_idle_ttl: crate::state::DEFAULT_SESSION_IDLE_TTL,
            max_sessions: crate::state::DEFAULT_MAX_SESSIONS,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tool_timeout_secs: u64 = parse_or(&get, "TOOL_TIMEOUT_SECS", 10)?;
        let recursion_limit: usize = parse_or(&get, "RECURSION_LIMIT", defaults.recursion_limit)?;
        if recursion_limit == 0 {
            return Err(OrchestrationError::Configuration(
                "RECURSION_LIMIT must be at least 1".to_string(),
            ));
        }

        let session_idle_secs: u64 = parse_or(
            &get,
            "SESSION_IDLE_SECS",
            defaults.session_idle_ttl.as_secs(),
        )?;

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                OrchestrationError::Configuration(format!("invalid PORT '{}': {}", raw, e))
            })?,
            None => defaults.port,
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            model_name: get("MODEL_NAME").unwrap_or(defaults.model_name),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            serper_api_key: get("SERPER_API_KEY"),
            serper_base_url: get("SERPER_BASE_URL").unwrap_or(defaults.serper_base_url),
            web_search_region: get("WEB_SEARCH_REGION").unwrap_or(defaults.web_search_region),
            web_search_recency: get("WEB_SEARCH_RECENCY").unwrap_or(defaults.web_search_recency),
            wikipedia_url_template: get("WIKIPEDIA_BASE_URL")
                .unwrap_or(defaults.wikipedia_url_template),
            alphavantage_api_key: get("ALPHAVANTAGE_API_KEY"),
            alphavantage_base_url: get("ALPHAVANTAGE_BASE_URL")
                .unwrap_or(defaults.alphavantage_base_url),
            retrieval_base_url: get("RETRIEVAL_API_BASE_URL"),
            retrieval_top_k: parse_or(&get, "RETRIEVAL_TOP_K", defaults.retrieval_top_k)?,
            audit_log_path: get("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.audit_log_path),
            recursion_limit,
            context_window: parse_or(&get, "CONTEXT_WINDOW", defaults.context_window)?,
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            expansion_temperature: parse_or(
                &get,
                "EXPANSION_TEMPERATURE",
                defaults.expansion_temperature,
            )?,
            port,
            session_idle_ttl: Duration::from_secs(session_idle_secs),
            max_sessions: parse_or(&get, "MAX_SESSIONS", defaults.max_sessions)?,
        })
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            OrchestrationError::Configuration(format!("invalid {} '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
