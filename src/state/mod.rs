//! Conversation state and session storage
//!
//! A `ConversationState` belongs to exactly one session. Nodes never touch it
//! directly; the orchestrator appends the messages they return.

use crate::models::Message;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Tool name under which expanded queries are recorded.
pub const EXPAND_QUERY_TOOL: &str = "expand_query";

/// Append-only, chronologically ordered history of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4())
    }

    pub fn with_session_id(session_id: Uuid) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Start a session from its first user message.
    pub fn from_user_query(query: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.append(Message::user(query));
        state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, delta: impl IntoIterator<Item = Message>) {
        self.messages.extend(delta);
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| matches!(m, Message::User(_)))
    }

    pub fn latest_user_query(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::User(u) if !u.content.trim().is_empty() => Some(u.content.as_str()),
            _ => None,
        })
    }

    /// The query the graph is currently working on: the latest successful
    /// expansion, else the latest user message.
    pub fn effective_query(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::ToolResult(t)
                if t.tool_name == EXPAND_QUERY_TOOL
                    && t.error.is_none()
                    && !t.content.trim().is_empty() =>
            {
                Some(t.content.as_str())
            }
            Message::User(u) if !u.content.trim().is_empty() => Some(u.content.as_str()),
            _ => None,
        })
    }

    /// Most recent successful expansions, oldest first.
    pub fn previous_expansions(&self, limit: usize) -> Vec<&str> {
        let mut found: Vec<&str> = self
            .messages
            .iter()
            .rev()
            .filter_map(|m| match m {
                Message::ToolResult(t) if t.tool_name == EXPAND_QUERY_TOOL && t.error.is_none() => {
                    Some(t.content.as_str())
                }
                _ => None,
            })
            .take(limit)
            .collect();

        found.reverse();
        found
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle on one session's state. Holding the lock makes the
/// holder the only writer of that history.
pub type SessionHandle = Arc<Mutex<ConversationState>>;

/// Trait for session lookup
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session's state, creating it on first use.
    async fn open(&self, session_id: Uuid) -> Result<SessionHandle>;
    async fn close(&self, session_id: Uuid) -> Result<bool>;
    async fn session_count(&self) -> usize;
}

/// Sessions untouched for this long may be dropped.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct SessionEntry {
    handle: SessionHandle,
    last_used: Instant,
}

impl SessionEntry {
    /// A session is in use while anyone besides the store holds its handle.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }
}

/// In-memory session store
///
/// Bounded: opening a new session first drops idle ones, then, at capacity,
/// the least recently used session not in use.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SESSION_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn evict(&self, sessions: &mut HashMap<Uuid, SessionEntry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.in_use() || now.duration_since(entry.last_used) < self.idle_ttl
        });

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, entry)| !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);

            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => {
                    warn!(sessions = sessions.len(), "session store over capacity, all sessions busy");
                    break;
                }
            }
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "sessions evicted");
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, session_id: Uuid) -> Result<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.last_used = now;
            return Ok(Arc::clone(&entry.handle));
        }

        self.evict(&mut sessions, now);

        let handle: SessionHandle =
            Arc::new(Mutex::new(ConversationState::with_session_id(session_id)));
        sessions.insert(
            session_id,
            SessionEntry {
                handle: Arc::clone(&handle),
                last_used: now,
            },
        );

        Ok(handle)
    }

    async fn close(&self, session_id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&session_id).is_some())
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
