use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use std::time::Duration;

use super::chat::ChatClient;
use super::{ LlmType, UpstreamError };
use crate::models::chat::ConversationMessage;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (1-based): base, 2×base, 4×base… capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success(String),
    Retryable(UpstreamError),
    Fatal(UpstreamError),
}

impl From<Result<String, UpstreamError>> for AttemptOutcome {
    fn from(result: Result<String, UpstreamError>) -> Self {
        match result {
            Ok(text) => AttemptOutcome::Success(text),
            Err(e) if e.is_retryable() => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

/// Wraps a provider client with bounded retries and a per-attempt timeout.
pub struct RetryingChatClient {
    inner: Arc<dyn ChatClient>,
    policy: RetryPolicy,
}

impl RetryingChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn attempt(&self, conversation: &[ConversationMessage]) -> AttemptOutcome {
        match tokio::time::timeout(self.policy.attempt_timeout, self.inner.complete(conversation)).await {
            Ok(result) => AttemptOutcome::from(result),
            Err(_) =>
                AttemptOutcome::Retryable(
                    UpstreamError::Transient(
                        format!("attempt timed out after {:?}", self.policy.attempt_timeout)
                    )
                ),
        }
    }
}

#[async_trait]
impl ChatClient for RetryingChatClient {
    async fn complete(
        &self,
        conversation: &[ConversationMessage]
    ) -> Result<String, UpstreamError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(conversation).await {
                AttemptOutcome::Success(text) => {
                    if attempt > 1 {
                        info!("Upstream call succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(text);
                }
                AttemptOutcome::Fatal(e) => {
                    warn!("Upstream call failed with non-retryable {} error", e.class());
                    return Err(e);
                }
                AttemptOutcome::Retryable(e) if attempt >= max_attempts => {
                    warn!("Upstream call failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
                AttemptOutcome::Retryable(e) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Upstream attempt {}/{} failed: {}. Retrying in {:.2}s",
                        attempt,
                        max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn get_model(&self) -> String {
        self.inner.get_model()
    }

    fn get_llm_type(&self) -> LlmType {
        self.inner.get_llm_type()
    }
}
