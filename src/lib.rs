pub mod agent;
pub mod cache;
pub mod cli;
pub mod history;
pub mod limiter;
pub mod llm;
pub mod models;
pub mod server;

use agent::ChatAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("History Context Turns: {}", args.history_context_turns);
    info!(
        "Retry: {} attempts, base {}ms, max {}ms, timeout {}s",
        args.retry_max_attempts,
        args.retry_base_delay_ms,
        args.retry_max_delay_ms,
        args.upstream_timeout_secs
    );
    info!(
        "Rate Limit: {} requests per {}s (trust X-Forwarded-For: {})",
        args.rate_limit_requests,
        args.rate_limit_window_secs,
        args.trust_forwarded_for
    );
    info!("Cache Enabled: {}", args.enable_cache);
    if args.enable_cache {
        info!("Cache Type: {}", args.cache_type);
        info!("Cache Redis URL: {}", args.cache_redis_url);
        info!("Cache TTL: {}s", args.cache_ttl);
        info!("Cache Scope: {}", args.cache_scope);
    }
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let agent = Arc::new(ChatAgent::from_args(&args).await?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}
