use financial_rag_agent::{
    agent::Orchestrator, config::AgentConfig, error::OrchestrationError,
    state::ConversationState, telemetry::init_tracing,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_tracing("info");

    let config = AgentConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;
    let mut state = ConversationState::new();

    info!(
        session_id = %state.session_id(),
        model = %config.model_name,
        audit_log = %config.audit_log_path.display(),
        "Financial RAG agent ready"
    );
    println!("Ask a financial question (empty line or 'exit' to quit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case("exit") {
            break;
        }

        match orchestrator.run_turn(&mut state, line).await {
            Ok(outcome) => {
                println!("\n{}\n", outcome.answer);
            }
            Err(e @ OrchestrationError::Configuration(_)) => {
                eprintln!("Configuration problem: {}", e);
                return Err(e.into());
            }
            Err(e @ OrchestrationError::RecursionLimitExceeded { .. }) => {
                eprintln!("No answer: {}. Starting a new session.", e);
                state = ConversationState::new();
                warn!(session_id = %state.session_id(), "session restarted after recursion limit");
            }
            Err(e) => {
                eprintln!("Could not answer: {}", e);
            }
        }
    }

    info!(session_id = %state.session_id(), messages = state.len(), "session ended");
    Ok(())
}
