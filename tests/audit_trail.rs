use financial_rag_agent::audit::AuditLog;
use financial_rag_agent::execution::DispatchEngine;
use financial_rag_agent::llm::ScriptedModel;
use financial_rag_agent::tools::ToolRegistry;
use financial_rag_agent::{
    router, verification, AssistantMessage, ConversationState, Orchestrator, OrchestratorSettings,
    ToolCallRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn read_records(path: &std::path::Path) -> Vec<Value> {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_turn_is_audited_node_by_node() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("check_agent_log.json");

    let model = ScriptedModel::new(|request| {
        Ok(match request.node {
            router::NODE_NAME => AssistantMessage::text("Moving to CheckAgent"),
            verification::NODE_NAME => {
                AssistantMessage::text("").with_tool_call(ToolCallRequest::new("answer_query"))
            }
            _ => AssistantMessage::text("<think>enough context</think>\nIBM pays a dividend."),
        })
    });
    let orch = Orchestrator::new(
        Arc::new(model),
        DispatchEngine::new(ToolRegistry::new(), Duration::from_secs(1)),
        Arc::new(AuditLog::new(&path)),
        OrchestratorSettings::default(),
    );

    let mut state = ConversationState::new();
    let outcome = tokio_test::assert_ok!(orch.run_turn(&mut state, "Does IBM pay a dividend?").await);
    assert_eq!(outcome.answer, "IBM pays a dividend.");

    let records = read_records(&path);
    let nodes: Vec<&str> = records
        .iter()
        .map(|r| {
            ["input_query", "query_redirection_agent", "check_agent", "answer_query"]
                .into_iter()
                .find(|n| r.get(*n).is_some())
                .unwrap_or("unknown")
        })
        .collect();
    assert_eq!(
        nodes,
        vec!["input_query", "query_redirection_agent", "check_agent", "answer_query"]
    );

    let session = state.session_id().to_string();
    for (step, record) in records.iter().enumerate() {
        assert_eq!(record["session_id"], json!(session));
        assert_eq!(record["step"], json!(step));
        assert!(record["timestamp"].is_string());
        assert_eq!(record["history_sha256"].as_str().map(str::len), Some(64));
    }

    // the stored answer keeps its reasoning block
    assert_eq!(records[3]["answer_query"]["reasoning"], Value::Null);
    assert!(records[3]["answer_query"]["content"]
        .as_str()
        .unwrap()
        .contains("<think>"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_never_lose_records() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(AuditLog::new(dir.path().join("audit.json")));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let log = Arc::clone(&log);
            tokio::spawn(async move { log.log_event(json!({ "writer": i })).await })
        })
        .collect();

    for handle in handles {
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    let records = read_records(log.path().unwrap());
    assert_eq!(records.len(), 16);

    let mut writers: Vec<i64> = records
        .iter()
        .map(|r| r["writer"].as_i64().unwrap())
        .collect();
    writers.sort_unstable();
    assert_eq!(writers, (0..16).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_corrupt_log_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.json");
    std::fs::write(&path, "{ not json").unwrap();

    let log = AuditLog::new(&path);
    tokio_test::assert_ok!(log.log_event(json!("restarted")).await);

    let records = read_records(&path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["event"], "restarted");
}
