use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{ Duration, Instant };
use tokio::sync::Mutex;

use super::ResponseCache;

#[derive(Default)]
pub struct MemoryResponseCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        if ttl_secs == 0 {
            return;
        }
        entries.insert(key.to_string(), (value.to_string(), now + Duration::from_secs(ttl_secs)));
    }
}
