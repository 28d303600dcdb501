//! REST API server for the financial RAG agent
//!
//! Each session id owns one `ConversationState` behind its own async mutex:
//! turns of one session run one at a time, different sessions concurrently.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::state::{InMemorySessionStore, SessionStore};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Any string; non-UUID values map to a stable UUID. Absent starts a new session.
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub session_id: Uuid,
    pub answer: String,
    pub steps: usize,
    pub appended: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<dyn SessionStore>,
}

/// =============================
/// Helpers
/// =============================

pub fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn resolve_session_id(value: Option<&str>) -> Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)),
        _ => Uuid::new_v4(),
    }
}

fn status_for(err: &OrchestrationError) -> StatusCode {
    match err {
        OrchestrationError::Validation(_) | OrchestrationError::EmptyHistory => {
            StatusCode::BAD_REQUEST
        }
        OrchestrationError::RecursionLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestrationError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestrationError::Upstream(_) | OrchestrationError::Llm(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = resolve_session_id(req.session_id.as_deref());
    info!(%session_id, "chat turn received");

    let handle = match state.sessions.open(session_id).await {
        Ok(handle) => handle,
        Err(e) => {
            return (
                status_for(&e),
                Json(ApiResponse::error(format!("Session unavailable: {}", e))),
            )
        }
    };

    let mut conversation = handle.lock().await;

    match state.orchestrator.run_turn(&mut conversation, &req.message).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(ChatReply {
                session_id: outcome.session_id,
                answer: outcome.answer,
                steps: outcome.steps,
                appended: outcome.appended,
            })),
        ),
        Err(e) => {
            warn!(%session_id, error = %e, "chat turn failed");
            (
                status_for(&e),
                Json(ApiResponse::error(format!("Orchestration failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    create_router_with_sessions(orchestrator, Arc::new(InMemorySessionStore::new()))
}

pub fn create_router_with_sessions(
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<dyn SessionStore>,
) -> Router {
    let state = ApiState {
        orchestrator,
        sessions,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<dyn SessionStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router_with_sessions(orchestrator, sessions);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::OrchestratorSettings;
    use crate::audit::AuditLog;
    use crate::execution::DispatchEngine;
    use crate::llm::ScriptedModel;
    use crate::models::{AssistantMessage, ToolCallRequest};
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(sessions: Arc<InMemorySessionStore>) -> Router {
        let model = ScriptedModel::new(|request| {
            Ok(match request.node {
                crate::router::NODE_NAME => AssistantMessage::text("Moving to CheckAgent"),
                crate::verification::NODE_NAME => {
                    AssistantMessage::text("").with_tool_call(ToolCallRequest::new("answer_query"))
                }
                _ => AssistantMessage::text("Here is your answer."),
            })
        });
        let orchestrator = Orchestrator::new(
            Arc::new(model),
            DispatchEngine::new(ToolRegistry::new(), Duration::from_secs(1)),
            Arc::new(AuditLog::in_memory()),
            OrchestratorSettings::default(),
        );
        create_router_with_sessions(Arc::new(orchestrator), sessions)
    }

    async fn post_chat(router: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_stable_uuid() {
        let a = stable_uuid_from_string("chat-42");
        assert_eq!(a, stable_uuid_from_string("chat-42"));
        assert_ne!(a, stable_uuid_from_string("chat-43"));
        assert_eq!(a.get_version_num(), 4);

        let parsed = Uuid::new_v4();
        assert_eq!(resolve_session_id(Some(&parsed.to_string())), parsed);
    }

    #[tokio::test]
    async fn test_health() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let response = app(sessions)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_turns_share_session_history() {
        let sessions = Arc::new(InMemorySessionStore::new());

        let (status, body) = post_chat(
            app(sessions.clone()),
            serde_json::json!({"session_id": "demo", "message": "What is IBM's P/E ratio?"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["answer"], "Here is your answer.");
        assert_eq!(body["data"]["appended"], 3);

        post_chat(
            app(sessions.clone()),
            serde_json::json!({"session_id": "demo", "message": "And MSFT?"}),
        )
        .await;

        let handle = sessions.open(stable_uuid_from_string("demo")).await.unwrap();
        assert_eq!(handle.lock().await.len(), 8);
        assert_eq!(sessions.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let (status, body) = post_chat(app(sessions), serde_json::json!({"message": "  "})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
