use financial_rag_agent::{
    agent::Orchestrator, api::start_server, config::AgentConfig, state::InMemorySessionStore,
    telemetry::init_tracing,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();
    init_tracing("info");

    let config = AgentConfig::from_env()?;
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; chat requests will fail until it is configured");
    }

    info!(port = config.port, model = %config.model_name, "Financial RAG agent - API server");

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    let sessions = Arc::new(InMemorySessionStore::with_limits(
        config.session_idle_ttl,
        config.max_sessions,
    ));

    start_server(orchestrator, sessions, config.port).await?;

    Ok(())
}
