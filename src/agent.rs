use crate::cache::{ create_response_cache, fingerprint, ResponseCache };
use crate::cli::Args;
use crate::history::{ initialize_history_store, HistoryError, HistoryOrder, HistoryStore };
use crate::limiter::RateLimiter;
use crate::llm::chat::{ new_client as new_chat_client, ChatClient };
use crate::llm::{ LlmConfig, RetryPolicy, RetryingChatClient, UpstreamError };
use crate::models::api::ChatRequest;
use crate::models::chat::{ ChatTurn, ConversationMessage, Role };

use log::{ error, info, warn };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use uuid::Uuid;

#[derive(Debug, ThisError)]
pub enum AgentError {
    #[error(transparent)]
    Storage(#[from] HistoryError),
}

/// Terminal state of one inbound chat request.
#[derive(Debug)]
pub enum ChatOutcome {
    RateLimited,
    InvalidInput {
        detail: String,
    },
    Cleared {
        session_id: String,
        removed: usize,
    },
    Served {
        session_id: String,
        response: String,
        cached: bool,
    },
    UpstreamFailed {
        session_id: String,
        error: UpstreamError,
    },
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Most recent turns sent upstream, including the new user message.
    pub context_turns: usize,
    pub cache_ttl_secs: u64,
    pub session_scoped_cache: bool,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            context_turns: 5,
            cache_ttl_secs: 300,
            session_scoped_cache: true,
            system_prompt: Some("You are a helpful assistant.".to_string()),
        }
    }
}

impl AgentSettings {
    pub fn from_args(args: &Args) -> Self {
        let system_prompt = Some(args.system_prompt.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            context_turns: args.history_context_turns,
            cache_ttl_secs: args.cache_ttl,
            session_scoped_cache: args.session_scoped_cache(),
            system_prompt,
        }
    }
}

#[derive(Clone)]
pub struct ChatAgent {
    chat_client: Arc<dyn ChatClient>,
    history_store: Arc<dyn HistoryStore>,
    response_cache: Option<Arc<dyn ResponseCache>>,
    limiter: Arc<RateLimiter>,
    settings: AgentSettings,
}

impl ChatAgent {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        history_store: Arc<dyn HistoryStore>,
        response_cache: Option<Arc<dyn ResponseCache>>,
        limiter: Arc<RateLimiter>,
        settings: AgentSettings
    ) -> Self {
        Self { chat_client, history_store, response_cache, limiter, settings }
    }

    fn initialize_chat_client(
        args: &Args
    ) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
        let chat_api_key = Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty());
        let chat_config = LlmConfig {
            llm_type: args.llm_type()?,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
        };
        let provider_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            provider_client.get_llm_type(),
            provider_client.get_model(),
            chat_config.base_url.as_deref().unwrap_or("adapter default")
        );

        let policy = RetryPolicy {
            max_attempts: args.retry_max_attempts,
            base_delay: Duration::from_millis(args.retry_base_delay_ms),
            max_delay: Duration::from_millis(args.retry_max_delay_ms),
            attempt_timeout: args.upstream_timeout(),
        };
        info!("Upstream retry policy: {:?}", policy);
        Ok(Arc::new(RetryingChatClient::new(provider_client, policy)))
    }

    /// Builds every collaborator from configuration. Fails on any missing
    /// precondition so the process never starts half-configured.
    pub async fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        args.validate()?;
        let chat_client = Self::initialize_chat_client(args)?;
        let history_store = initialize_history_store(args).await?;
        let response_cache = create_response_cache(args).await?;
        let limiter = Arc::new(RateLimiter::per_window(args.rate_limit_requests, args.rate_limit_window())?);

        Ok(Self::new(chat_client, history_store, response_cache, limiter, AgentSettings::from_args(args)))
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    fn cache_key(&self, session_id: &str, message: &str) -> String {
        let scope = if self.settings.session_scoped_cache { Some(session_id) } else { None };
        fingerprint(scope, message)
    }

    async fn build_context(
        &self,
        session_id: &str
    ) -> Result<Vec<ConversationMessage>, AgentError> {
        let recent = self.history_store.history(
            session_id,
            Some(self.settings.context_turns.max(1)),
            HistoryOrder::Ascending
        ).await?;

        let mut conversation = Vec::with_capacity(recent.len() + 1);
        if let Some(system_prompt) = &self.settings.system_prompt {
            conversation.push(ConversationMessage::new(Role::System, system_prompt.clone()));
        }
        conversation.extend(recent.iter().map(ConversationMessage::from));
        Ok(conversation)
    }

    pub async fn handle(
        &self,
        identity: &str,
        request: ChatRequest
    ) -> Result<ChatOutcome, AgentError> {
        if !self.limiter.allow(identity) {
            return Ok(ChatOutcome::RateLimited);
        }

        let session_id = request.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if request.clear_conversation {
            let removed = self.history_store.clear(&session_id).await?;
            info!("Cleared {} turns for session {}", removed, session_id);
            return Ok(ChatOutcome::Cleared { session_id, removed });
        }

        // Stored as sent; the cache key normalizes on its own.
        let message = match request.message {
            Some(m) if !m.trim().is_empty() => m,
            _ => {
                return Ok(ChatOutcome::InvalidInput {
                    detail: "Message cannot be empty".to_string(),
                });
            }
        };

        self.history_store.append(&session_id, true, &message).await?;

        let cache_key = self.cache_key(&session_id, &message);
        if let Some(cache) = &self.response_cache {
            if let Some(cached_response) = cache.get(&cache_key).await {
                info!("Cache hit for session {}", session_id);
                self.history_store.append(&session_id, false, &cached_response).await?;
                return Ok(ChatOutcome::Served { session_id, response: cached_response, cached: true });
            }
        }

        let conversation = self.build_context(&session_id).await?;
        let response_content = match self.chat_client.complete(&conversation).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    "Upstream call failed for session {} (class={}): {}",
                    session_id,
                    e.class(),
                    e
                );
                return Ok(ChatOutcome::UpstreamFailed { session_id, error: e });
            }
        };

        self.history_store.append(&session_id, false, &response_content).await?;

        if let Some(cache) = &self.response_cache {
            cache.set(&cache_key, &response_content, self.settings.cache_ttl_secs).await;
        }

        Ok(ChatOutcome::Served { session_id, response: response_content, cached: false })
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatTurn>, AgentError> {
        let turns = self.history_store.history(session_id, None, HistoryOrder::Ascending).await?;
        if turns.is_empty() {
            warn!("History requested for empty or unknown session {}", session_id);
        }
        Ok(turns)
    }
}
