//! Conversation sessions.
//!
//! A [`ConversationSession`] is an ordered chat log that always begins with
//! the assistant greeting. Every submitted question appends exactly two
//! turns: the user's text and one assistant reply (an answer or an error
//! line). [`SessionRegistry`] keeps one session per client for the HTTP
//! server, each with its own connection settings and search pipeline.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::connection::ConnectionConfig;
use crate::models::ConversationTurn;
use crate::search::HybridSearch;

/// First assistant turn of every session.
pub const SEED_MESSAGE: &str = "How can I help you?";

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSession {
    turns: Vec<ConversationTurn>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            turns: vec![ConversationTurn::assistant(SEED_MESSAGE)],
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Reset to the seed turn only.
    pub fn clear(&mut self) {
        self.turns = vec![ConversationTurn::assistant(SEED_MESSAGE)];
    }

    /// Await the responder, then append the user's query and its reply
    /// together. Returns the assistant turn.
    ///
    /// Nothing is recorded until the reply exists, so dropping the future
    /// mid-flight leaves the log unchanged.
    pub async fn submit<F, Fut>(&mut self, query: &str, responder: F) -> ConversationTurn
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = String>,
    {
        let question = ConversationTurn::user(query);
        let reply = ConversationTurn::assistant(responder(query.to_string()).await);
        self.turns.push(question);
        self.turns.push(reply.clone());
        reply
    }

    /// Ask `search` and record the exchange.
    pub async fn ask(&mut self, query: &str, search: &HybridSearch) -> ConversationTurn {
        self.submit(query, |q| async move { search.answer(&q).await })
            .await
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the server keeps for one client.
pub struct SessionState {
    pub connection: ConnectionConfig,
    pub search: HybridSearch,
    pub conversation: ConversationSession,
}

pub type SessionHandle = Arc<Mutex<SessionState>>;

struct Entry {
    handle: SessionHandle,
    last_used: Instant,
}

/// Session id → state. Each entry has its own lock, so one session handles
/// one request at a time while different sessions run concurrently.
///
/// Sessions untouched for longer than the idle timeout are dropped on the
/// next insert or lookup.
pub struct SessionRegistry {
    idle_timeout: Duration,
    sessions: Mutex<HashMap<Uuid, Entry>>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, sessions: &mut HashMap<Uuid, Entry>) {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < self.idle_timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::info!(expired, active = sessions.len(), "idle sessions dropped");
        }
    }

    pub async fn insert(&self, state: SessionState) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.lock().await;
        self.prune(&mut sessions);
        sessions.insert(
            id,
            Entry {
                handle: Arc::new(Mutex::new(state)),
                last_used: Instant::now(),
            },
        );
        tracing::debug!(session = %id, active = sessions.len(), "session created");
        id
    }

    /// Look up a session and mark it as used.
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        self.prune(&mut sessions);
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.handle.clone())
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.lock().await.remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "session removed");
        }
        removed
    }
}
