use async_trait::async_trait;
use log::warn;
use redis::{ Client, AsyncCommands };
use redis::aio::MultiplexedConnection;

use super::ResponseCache;

const KEY_PREFIX: &str = "cache:";

pub struct RedisResponseCache {
    conn: MultiplexedConnection,
}

impl RedisResponseCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(format!("{}{}", KEY_PREFIX, key)).await {
            Ok(val) => val,
            Err(e) => {
                warn!("Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        if ttl_secs == 0 {
            return;
        }
        let mut conn = self.conn.clone();
        let result = conn.set_ex::<_, _, ()>(format!("{}{}", KEY_PREFIX, key), value, ttl_secs).await;
        if let Err(e) = result {
            warn!("Failed to write response cache: {}", e);
        }
    }
}
