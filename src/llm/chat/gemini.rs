use async_trait::async_trait;
use std::error::Error as StdError;
use log::{ debug, info };

use super::{ ensure_not_empty, ChatClient };
use crate::llm::error::classify_message;
use crate::llm::{ LlmConfig, LlmType, UpstreamError };
use crate::models::chat::{ ConversationMessage, Role };
use rllm::chat::{ ChatMessage, ChatRole, MessageType };
use rllm::builder::{ LLMBackend, LLMBuilder };
use rllm::LLMProvider;

pub struct GeminiChatClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
    model: String,
    base_url: Option<String>,
}

/// Gemini has no system role here: system text is folded into the next user
/// turn, and consecutive same-role turns stay separate.
fn to_provider_messages(conversation: &[ConversationMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len());
    let mut pending_system: Vec<&str> = Vec::new();

    for msg in conversation {
        match msg.role {
            Role::System => pending_system.push(msg.content.as_str()),
            Role::User => {
                let content = if pending_system.is_empty() {
                    msg.content.clone()
                } else {
                    let preamble = pending_system.join("\n");
                    pending_system.clear();
                    format!("{}\n\n{}", preamble, msg.content)
                };
                messages.push(ChatMessage {
                    role: ChatRole::User,
                    content,
                    message_type: MessageType::Text,
                });
            }
            Role::Assistant => {
                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: msg.content.clone(),
                    message_type: MessageType::Text,
                });
            }
        }
    }

    if !pending_system.is_empty() {
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: pending_system.join("\n"),
            message_type: MessageType::Text,
        });
    }

    messages
}

fn reply_text(text: Option<String>) -> Result<String, UpstreamError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(UpstreamError::Malformed("Gemini response carried no text".to_string())),
    }
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gemini-1.5-flash-latest".to_string());

        let mut builder = LLMBuilder::new()
            .backend(LLMBackend::Google)
            .api_key(api_key)
            .model(&chat_model)
            .stream(false);

        if let Some(url) = &base_url {
            builder = builder.base_url(url);
        }
        if let Some(tokens) = max_tokens {
            builder = builder.max_tokens(tokens);
        }
        if let Some(temp) = temperature {
            builder = builder.temperature(temp);
        }

        let llm_provider = builder.build()?;

        Ok(Self {
            llm: llm_provider,
            model: chat_model,
            base_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| "Google API key is required for GeminiChatClient".to_string())?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone(), Some(2048), None)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(
        &self,
        conversation: &[ConversationMessage]
    ) -> Result<String, UpstreamError> {
        ensure_not_empty(conversation)?;
        let messages = to_provider_messages(conversation);
        info!(
            "GeminiChatClient::complete() → model={} base_url={:?} turns={}",
            self.model,
            self.base_url,
            messages.len()
        );
        let resp = self.llm.chat(&messages).await.map_err(|e| {
            let message = e.to_string();
            debug!("Gemini call failed: {}", message);
            classify_message(&message)
        })?;
        reply_text(resp.text())
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Gemini
    }
}
