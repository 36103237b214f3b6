use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ apply_window, HistoryError, HistoryOrder, HistoryStore };
use crate::models::chat::ChatTurn;

/// In-process store. Turns live as long as the process.
#[derive(Default)]
pub struct MemoryHistoryStore {
    sessions: RwLock<HashMap<String, Vec<ChatTurn>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(
        &self,
        session_id: &str,
        is_user: bool,
        text: &str
    ) -> Result<ChatTurn, HistoryError> {
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(session_id.to_string()).or_default();

        let mut timestamp = Utc::now();
        if let Some(last) = turns.last() {
            timestamp = timestamp.max(last.timestamp);
        }

        let turn = ChatTurn {
            session_id: session_id.to_string(),
            is_user,
            text: text.to_string(),
            timestamp,
        };
        turns.push(turn.clone());
        Ok(turn)
    }

    async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
        order: HistoryOrder
    ) -> Result<Vec<ChatTurn>, HistoryError> {
        let sessions = self.sessions.read().await;
        let turns = sessions.get(session_id).cloned().unwrap_or_default();
        Ok(apply_window(turns, limit, order))
    }

    async fn clear(&self, session_id: &str) -> Result<usize, HistoryError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).map(|turns| turns.len()).unwrap_or(0))
    }
}
