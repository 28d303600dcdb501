//! Audit sink
//!
//! Every node output is appended as a tagged JSON record to a single JSON
//! array file. Writers are serialized through one async mutex, so records
//! from concurrent sessions never interleave.

use crate::error::OrchestrationError;
use crate::state::ConversationState;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Append-only audit trail, kept either in a file or in memory.
pub struct AuditLog {
    path: Option<PathBuf>,
    /// Held for every write. Only filled when there is no file.
    records: Arc<Mutex<Vec<Value>>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one record, stamping `timestamp` when absent. A missing or
    /// unreadable file is replaced by a fresh log.
    pub async fn log_event(&self, record: Value) -> Result<()> {
        let mut record = match record {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("event".to_string(), other);
                map
            }
        };
        record
            .entry("timestamp")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let record = Value::Object(record);

        let mut records = self.records.lock().await;

        match &self.path {
            Some(path) => {
                let mut on_disk = read_log(path).await;
                on_disk.push(record);
                write_log(path, &on_disk).await?;
            }
            None => records.push(record),
        }

        Ok(())
    }

    /// Record a node's output under its node name.
    pub async fn record_node<T: Serialize>(
        &self,
        session_id: Uuid,
        step: usize,
        node: &str,
        output: &T,
        history_hash: &str,
    ) -> Result<()> {
        let mut record = serde_json::Map::new();
        record.insert(node.to_string(), serde_json::to_value(output)?);
        record.insert("session_id".to_string(), json!(session_id));
        record.insert("step".to_string(), json!(step));
        record.insert("history_sha256".to_string(), json!(history_hash));

        self.log_event(Value::Object(record)).await
    }

    /// Every record in the log, oldest first.
    pub async fn records(&self) -> Vec<Value> {
        let records = self.records.lock().await;
        match &self.path {
            Some(path) => read_log(path).await,
            None => records.clone(),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

async fn read_log(path: &Path) -> Vec<Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Vec::new(),
        Ok(text) => match serde_json::from_str::<Vec<Value>>(&text) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "audit log corrupted, starting a fresh log");
                Vec::new()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "audit log unreadable, starting a fresh log");
            Vec::new()
        }
    }
}

async fn write_log(path: &Path, records: &[Value]) -> Result<()> {
    let body = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| OrchestrationError::Audit(format!("{}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| OrchestrationError::Audit(format!("{}: {}", path.display(), e)))?;

    Ok(())
}

/// SHA-256 of the serialized history, hex encoded.
/// Streams JSON straight into the hasher.
pub fn compute_history_hash(state: &ConversationState) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), state.messages()).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[tokio::test]
    async fn test_timestamp_is_stamped_only_when_absent() {
        let log = AuditLog::in_memory();
        log.log_event(json!({"check_agent": "answer"})).await.unwrap();
        log.log_event(json!({"input_query": "hi", "timestamp": "fixed"})).await.unwrap();
        log.log_event(json!("bare")).await.unwrap();

        let records = log.records().await;
        assert_eq!(records.len(), 3);
        assert!(records[0]["timestamp"].is_string());
        assert_eq!(records[1]["timestamp"], "fixed");
        assert_eq!(records[2]["event"], "bare");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check_agent_log.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let log = AuditLog::new(&path);
        log.log_event(json!({"answer_query": "done"})).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let on_disk: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0]["answer_query"], "done");
    }

    #[tokio::test]
    async fn test_file_log_keeps_nothing_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.json"));

        for step in 0..5 {
            log.log_event(json!({"check_agent": step})).await.unwrap();
        }

        assert!(log.records.lock().await.is_empty());
        let records = log.records().await;
        assert_eq!(records.len(), 5);
        assert_eq!(records[4]["check_agent"], 4);
    }

    #[test]
    fn test_history_hash_tracks_content() {
        let mut state = ConversationState::from_user_query("What is IBM's P/E ratio?");
        let first = compute_history_hash(&state);
        assert_eq!(first.len(), 64);
        assert_eq!(first, compute_history_hash(&state));

        state.append(Message::assistant("Calling FinancialMetrics"));
        assert_ne!(first, compute_history_hash(&state));
    }
}
