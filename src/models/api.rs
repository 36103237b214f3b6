use serde::{ Serialize, Deserialize };

use super::chat::ChatTurn;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub clear_conversation: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClearResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryEntry {
    pub message: String,
    pub is_user: bool,
    pub timestamp: String,
}

impl From<ChatTurn> for HistoryEntry {
    fn from(turn: ChatTurn) -> Self {
        Self {
            message: turn.text,
            is_user: turn.is_user,
            timestamp: turn.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
}
