//! Per-session conversation history.
//!
//! [`ConversationHistory`] is an append-only log of [`Turn`]s keyed by a
//! caller-chosen session id. Sessions never see each other's turns. The
//! store is shared behind an `Arc` by every request handler and is safe
//! to append to from concurrent sessions.
//!
//! An optional per-session cap drops the oldest turns once exceeded;
//! with no cap the log grows for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::models::Turn;

#[derive(Debug, Default)]
pub struct ConversationHistory {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
    max_turns: Option<usize>,
}

impl ConversationHistory {
    /// An unbounded history store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_turns` turns per session. `0` means unbounded.
    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::default(),
            max_turns: (max_turns > 0).then_some(max_turns),
        }
    }

    pub fn max_turns(&self) -> Option<usize> {
        self.max_turns
    }

    /// Record a completed exchange and return the stored turn.
    pub fn append(&self, session_id: &str, query: &str, answer: &str) -> Turn {
        let turn = Turn {
            session_id: session_id.to_string(),
            query: query.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(turn.clone());
        if let Some(cap) = self.max_turns {
            if turns.len() > cap {
                let excess = turns.len() - cap;
                turns.drain(..excess);
            }
        }
        turn
    }

    /// All retained turns for `session_id`, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a session. Returns the number of turns removed.
    pub fn clear(&self, session_id: &str) -> usize {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .map(|turns| turns.len())
            .unwrap_or(0)
    }

    /// Known session ids, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
