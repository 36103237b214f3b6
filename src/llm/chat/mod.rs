pub mod ollama;
pub mod openai;
pub mod gemini;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use super::{ LlmConfig, LlmType, UpstreamError };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use self::gemini::GeminiChatClient;
use crate::models::chat::ConversationMessage;

/// Conversation completion against one upstream provider.
///
/// Providers that accept role-tagged turns send them as-is; single-prompt
/// providers flatten the conversation before calling out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        conversation: &[ConversationMessage]
    ) -> Result<String, UpstreamError>;

    fn get_model(&self) -> String;
    fn get_llm_type(&self) -> LlmType;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

pub(crate) fn ensure_not_empty(conversation: &[ConversationMessage]) -> Result<(), UpstreamError> {
    if conversation.iter().all(|m| m.content.trim().is_empty()) {
        return Err(UpstreamError::InvalidRequest("empty conversation".to_string()));
    }
    Ok(())
}
