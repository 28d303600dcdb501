//! Financial RAG Agent
//!
//! Routes a financial question through retrieval and computation tools,
//! checks whether the gathered context is enough, and refines the query
//! until it can answer:
//! - a model-driven router picks hybrid search, web/encyclopedia lookup or
//!   financial metrics
//! - dispatch runs the requested tools with timeouts; failures become
//!   visible tool results, never crashes
//! - verification chooses between expanding the query and answering
//! - every run is bounded by a recursion limit and fully audited
//!
//! GRAPH:
//! INPUT → ROUTE → DISPATCH → VERIFY → EXPAND? → ROUTE ... → ANSWER → END

pub mod agent;
pub mod answer;
pub mod api;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod expansion;
pub mod llm;
pub mod models;
pub mod router;
pub mod state;
pub mod telemetry;
pub mod tools;
pub mod verification;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{GraphNode, Orchestrator, OrchestratorSettings};
pub use models::*;
pub use state::ConversationState;
