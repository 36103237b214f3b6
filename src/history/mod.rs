mod memory;
mod redis;
use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;
use crate::cli::Args;
use crate::models::chat::{ ChatTurn, ConversationMessage, Role };

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

#[derive(Debug, ThisError)]
pub enum HistoryError {
    #[error("history storage unavailable: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOrder {
    #[default]
    Ascending,
    Descending,
}

/// Durable, append-only record of chat turns grouped by session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a turn stamped with the current time. Timestamps never go
    /// backwards within a session.
    async fn append(
        &self,
        session_id: &str,
        is_user: bool,
        text: &str
    ) -> Result<ChatTurn, HistoryError>;

    /// With `limit`, only the most recent `limit` turns are returned. Unknown
    /// sessions yield an empty list.
    async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
        order: HistoryOrder
    ) -> Result<Vec<ChatTurn>, HistoryError>;

    /// Removes every turn of the session and returns how many were removed.
    async fn clear(&self, session_id: &str) -> Result<usize, HistoryError>;
}

pub async fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisHistoryStore::connect(
                &args.history_host,
                &args.history_redis_prefix
            ).await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub async fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    create_history_store(args).await
}

/// Flattens a conversation for providers that take a single prompt.
pub fn format_history_for_prompt(conversation: &[ConversationMessage]) -> String {
    let mut result = String::new();
    for msg in conversation {
        let role_display = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}

pub(crate) fn apply_window(mut turns: Vec<ChatTurn>, limit: Option<usize>, order: HistoryOrder) -> Vec<ChatTurn> {
    if let Some(limit) = limit {
        let skip = turns.len().saturating_sub(limit);
        turns.drain(..skip);
    }
    if order == HistoryOrder::Descending {
        turns.reverse();
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turns(n: usize) -> Vec<ChatTurn> {
        (0..n)
            .map(|i| ChatTurn {
                session_id: "s".into(),
                is_user: i % 2 == 0,
                text: format!("t{}", i),
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn window_keeps_most_recent_turns() {
        let kept = apply_window(turns(7), Some(3), HistoryOrder::Ascending);
        let texts: Vec<_> = kept.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["t4", "t5", "t6"]);
    }

    #[test]
    fn window_descending_reverses_after_limiting() {
        let kept = apply_window(turns(4), Some(2), HistoryOrder::Descending);
        let texts: Vec<_> = kept.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["t3", "t2"]);
    }

    #[test]
    fn prompt_lists_each_turn_with_its_role() {
        let conversation = vec![
            ConversationMessage::new(Role::User, "Hello"),
            ConversationMessage::new(Role::Assistant, "Hi there!")
        ];
        assert_eq!(format_history_for_prompt(&conversation), "User: Hello\nAssistant: Hi there!\n");
        assert_eq!(format_history_for_prompt(&[]), "");
    }
}
