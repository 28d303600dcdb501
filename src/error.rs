//! Error types for the financial RAG agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    // =============================
    // Tool / Capability Errors
    // =============================

    /// Bad numeric input to a metric, or a malformed ticker symbol.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or API failure from a collaborator.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Missing credential or malformed setting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // Graph Errors
    // =============================

    #[error("Cannot expand query: conversation history is empty")]
    EmptyHistory,

    #[error("Recursion limit of {limit} node executions exceeded")]
    RecursionLimitExceeded { limit: usize },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Audit error: {0}")]
    Audit(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Errors allowed to end a session without an answer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Configuration(_)
                | OrchestrationError::RecursionLimitExceeded { .. }
        )
    }

    /// Map a transport failure into an upstream error, naming timeouts explicitly.
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrchestrationError::Upstream(format!("{} timed out: {}", context, err))
        } else {
            OrchestrationError::Upstream(format!("{} failed: {}", context, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OrchestrationError::Configuration("no key".into()).is_fatal());
        assert!(OrchestrationError::RecursionLimitExceeded { limit: 50 }.is_fatal());
        assert!(!OrchestrationError::Validation("empty".into()).is_fatal());
        assert!(!OrchestrationError::Upstream("502".into()).is_fatal());
        assert!(!OrchestrationError::EmptyHistory.is_fatal());
    }

    #[test]
    fn test_recursion_limit_message() {
        let err = OrchestrationError::RecursionLimitExceeded { limit: 50 };
        assert_eq!(err.to_string(), "Recursion limit of 50 node executions exceeded");
    }
}
