pub mod memory;
pub mod redis;

use async_trait::async_trait;
use log::info;
use sha2::{ Digest, Sha256 };
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;

pub use self::memory::MemoryResponseCache;
pub use self::redis::RedisResponseCache;

/// Best-effort reply cache. Misses and backend failures look the same to the
/// caller; neither method ever fails the request.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64);
}

/// SHA-256 over the length-prefixed scope and the trimmed, lowercased text.
pub fn fingerprint(scope: Option<&str>, text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    match scope {
        Some(scope) => {
            hasher.update([1u8]);
            hasher.update((scope.len() as u64).to_le_bytes());
            hasher.update(scope.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update((normalized.len() as u64).to_le_bytes());
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn create_response_cache(
    args: &Args
) -> Result<Option<Arc<dyn ResponseCache>>, Box<dyn Error + Send + Sync>> {
    if !args.enable_cache {
        info!("Cache disabled.");
        return Ok(None);
    }

    match args.cache_type.to_lowercase().as_str() {
        "redis" => {
            let cache = RedisResponseCache::connect(&args.cache_redis_url).await?;
            info!("Cache Redis client connected to {}", args.cache_redis_url);
            Ok(Some(Arc::new(cache)))
        }
        "memory" => {
            info!("Using in-process response cache");
            Ok(Some(Arc::new(MemoryResponseCache::new())))
        }
        other => Err(format!("Unsupported cache type: {}", other).into()),
    }
}
