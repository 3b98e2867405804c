use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use forge_core::ids::SessionId;
use forge_core::messages::Turn;

use crate::error::StoreError;

/// The most recent non-retryable tool failure in a session, kept for manual replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastFailedTool {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub error_message: String,
}

#[derive(Default)]
struct SessionEntry {
    history: Vec<Turn>,
    last_failed: Option<LastFailedTool>,
}

/// Result of looking up or creating a session for an incoming request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSession {
    pub id: SessionId,
    /// True when no session existed under the id before this call.
    pub created: bool,
}

/// In-memory table of conversation histories. Nothing survives a restart.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the requested session, creating it when absent.
    /// An unknown well-formed client id is adopted; a malformed one is
    /// replaced with a fresh id.
    #[instrument(skip(self))]
    pub fn resolve(&self, requested: Option<&SessionId>) -> ResolvedSession {
        let id = match requested {
            Some(id) if id.is_well_formed() => id.clone(),
            Some(id) => {
                warn!(requested = %id, "malformed session id replaced");
                SessionId::new()
            }
            None => SessionId::new(),
        };
        let mut created = false;
        self.sessions.entry(id.clone()).or_insert_with(|| {
            created = true;
            SessionEntry::default()
        });
        if created {
            debug!(session_id = %id, "session created");
        }
        ResolvedSession { id, created }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of a session's history. Unknown sessions have none.
    pub fn history(&self, id: &SessionId) -> Vec<Turn> {
        self.sessions
            .get(id)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    /// Append a turn. A session removed concurrently is recreated.
    pub fn append(&self, id: &SessionId, turn: Turn) {
        self.sessions.entry(id.clone()).or_default().history.push(turn);
    }

    /// Empty a session's history and drop its recorded failure.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn reset(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        entry.history.clear();
        entry.last_failed = None;
        debug!("session reset");
        Ok(())
    }

    pub fn set_last_failed(&self, id: &SessionId, failure: LastFailedTool) {
        self.sessions.entry(id.clone()).or_default().last_failed = Some(failure);
    }

    pub fn last_failed(&self, id: &SessionId) -> Option<LastFailedTool> {
        self.sessions.get(id).and_then(|entry| entry.last_failed.clone())
    }

    pub fn clear_last_failed(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.last_failed = None;
        }
    }
}
