use clap::Parser;
use std::error::Error;
use std::time::Duration;

use crate::llm::{ parse_llm_type, LlmType };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8000")]
    pub server_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    // --- History Store Args ---
    /// History chat store type (redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "redis")]
    pub history_type: String,

    /// History chat store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    /// Number of most recent turns sent to the model as conversation context.
    #[arg(long, env = "HISTORY_CONTEXT_TURNS", default_value = "5")]
    pub history_context_turns: usize,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, ollama, gemini)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider. Required for openai and gemini.
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-3.5-turbo, llama3)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// System prompt placed ahead of the conversation. Empty disables it.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = "You are a helpful assistant.")]
    pub system_prompt: String,

    // --- Retry Args ---
    /// Total upstream attempts per request, including the first one.
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry in milliseconds; doubles on each retry.
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "2000")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for the retry delay in milliseconds.
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    pub retry_max_delay_ms: u64,

    /// Timeout for a single upstream attempt in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "30")]
    pub upstream_timeout_secs: u64,

    // --- Rate Limit Args ---
    /// Requests allowed per caller within one rate limit window.
    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value = "3")]
    pub rate_limit_requests: u32,

    /// Length of the rate limit window in seconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Identify callers by the first X-Forwarded-For hop. Only enable behind a
    /// proxy that overwrites the header.
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value = "false")]
    pub trust_forwarded_for: bool,

    // --- Caching Args ---
    /// Enable the response cache.
    #[arg(long, env = "ENABLE_CACHE", default_value = "true")]
    pub enable_cache: bool,

    /// Response cache backend (redis, memory)
    #[arg(long, env = "CACHE_TYPE", default_value = "redis")]
    pub cache_type: String,

    /// Redis URL for the caching layer.
    #[arg(long, env = "CACHE_REDIS_URL", default_value = "redis://127.0.0.1:6379/1")] // Use DB 1 to avoid collision
    pub cache_redis_url: String,

    /// Time-to-live (TTL) in seconds for cached responses.
    #[arg(long, env = "CACHE_TTL", default_value = "300")]
    pub cache_ttl: u64,

    /// Cache key scope: "session" keys on (session, text), "global" on text alone.
    #[arg(long, env = "CACHE_SCOPE", default_value = "session")]
    pub cache_scope: String,

    // --- TLS Args ---
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,
}

impl Args {
    /// Startup preconditions. A failure here aborts the process before any
    /// listener binds.
    pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let llm_type = parse_llm_type(&self.chat_llm_type)?;
        if llm_type.requires_api_key() && self.chat_api_key.trim().is_empty() {
            return Err(
                format!(
                    "CHAT_API_KEY must be set when CHAT_LLM_TYPE is '{}'",
                    self.chat_llm_type
                ).into()
            );
        }
        if self.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be at least 1".into());
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window_secs == 0 {
            return Err("Rate limit values must be greater than zero".into());
        }
        match self.cache_scope.to_lowercase().as_str() {
            "session" | "global" => {}
            other => {
                return Err(format!("Unsupported cache scope: {}", other).into());
            }
        }
        if self.enable_tls && (self.tls_cert_path.is_none() || self.tls_key_path.is_none()) {
            return Err("--enable-tls requires both --tls-cert-path and --tls-key-path".into());
        }
        Ok(())
    }

    pub fn session_scoped_cache(&self) -> bool {
        !self.cache_scope.eq_ignore_ascii_case("global")
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn llm_type(&self) -> Result<LlmType, String> {
        parse_llm_type(&self.chat_llm_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["session-chat"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn openai_without_key_fails_fast() {
        let args = parse(&["--chat-llm-type", "openai", "--chat-api-key", ""]);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("CHAT_API_KEY"));
    }

    #[test]
    fn ollama_does_not_need_a_key() {
        let args = parse(&["--chat-llm-type", "ollama", "--chat-api-key", ""]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let args = parse(&["--chat-llm-type", "carrier-pigeon", "--chat-api-key", "k"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let args = parse(&["--chat-api-key", "k", "--rate-limit-requests", "0"]);
        assert!(args.validate().is_err());
        let args = parse(&["--chat-api-key", "k", "--rate-limit-window-secs", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn forwarded_header_is_untrusted_by_default() {
        let args = parse(&["--chat-api-key", "k"]);
        assert!(!args.trust_forwarded_for);
        assert_eq!(args.rate_limit_window(), Duration::from_secs(60));
        let args = parse(&["--chat-api-key", "k", "--trust-forwarded-for"]);
        assert!(args.trust_forwarded_for);
    }

    #[test]
    fn tls_needs_both_paths() {
        let args = parse(&["--chat-api-key", "k", "--enable-tls", "--tls-cert-path", "c.pem"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn cache_scope_defaults_to_session() {
        let args = parse(&["--chat-api-key", "k"]);
        assert!(args.session_scoped_cache());
        let args = parse(&["--chat-api-key", "k", "--cache-scope", "global"]);
        assert!(!args.session_scoped_cache());
    }
}
