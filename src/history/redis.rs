use async_trait::async_trait;
use crate::models::chat::ChatTurn;
use super::{ apply_window, HistoryError, HistoryOrder, HistoryStore };
use chrono::{ DateTime, Utc };
use log::error;
use redis::{ Client, AsyncCommands, Script };
use redis::aio::MultiplexedConnection;
use serde::{ Serialize, Deserialize };

// Clamps the new timestamp to the session's last one and appends in a single
// server-side step so concurrent writers cannot interleave out of order.
const APPEND_SCRIPT: &str = r#"
local ts = tonumber(ARGV[1])
local last = redis.call('LINDEX', KEYS[1], -1)
if last then
  local ok, prev = pcall(cjson.decode, last)
  if ok and prev['timestamp_ms'] and tonumber(prev['timestamp_ms']) > ts then
    ts = tonumber(prev['timestamp_ms'])
  end
end
local entry = cjson.decode(ARGV[2])
entry['timestamp_ms'] = ts
redis.call('RPUSH', KEYS[1], cjson.encode(entry))
return ts
"#;

#[derive(Serialize, Deserialize)]
struct StoredTurn {
    is_user: bool,
    text: String,
    timestamp_ms: i64,
}

impl StoredTurn {
    fn into_turn(self, session_id: &str) -> ChatTurn {
        ChatTurn {
            session_id: session_id.to_string(),
            is_user: self.is_user,
            text: self.text,
            timestamp: millis_to_datetime(self.timestamp_ms),
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<redis::RedisError> for HistoryError {
    fn from(err: redis::RedisError) -> Self {
        HistoryError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Storage(format!("encoding failed: {}", err))
    }
}

/// One Redis list per session, oldest turn at the head.
pub struct RedisHistoryStore {
    conn: MultiplexedConnection,
    key_prefix: String,
    append_script: Script,
}

impl RedisHistoryStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            append_script: Script::new(APPEND_SCRIPT),
        })
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }
}

fn decode_entries(session_id: &str, entries: &[String]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(entries.len());
    for json_entry in entries {
        match serde_json::from_str::<StoredTurn>(json_entry) {
            Ok(stored) => turns.push(stored.into_turn(session_id)),
            Err(e) => {
                error!("Error parsing history entry for session {}: {}", session_id, e);
            }
        }
    }
    turns
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn append(
        &self,
        session_id: &str,
        is_user: bool,
        text: &str
    ) -> Result<ChatTurn, HistoryError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let stored = StoredTurn {
            is_user,
            text: text.to_string(),
            timestamp_ms: now_ms,
        };
        let json_msg = serde_json::to_string(&stored)?;

        let assigned_ms: i64 = self.append_script
            .key(self.key(session_id))
            .arg(now_ms)
            .arg(json_msg)
            .invoke_async(&mut conn).await?;

        Ok(StoredTurn { timestamp_ms: assigned_ms, ..stored }.into_turn(session_id))
    }

    async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
        order: HistoryOrder
    ) -> Result<Vec<ChatTurn>, HistoryError> {
        let mut conn = self.conn.clone();
        let start: isize = match limit {
            Some(0) => {
                return Ok(Vec::new());
            }
            Some(n) => -(n.min(isize::MAX as usize) as isize),
            None => 0,
        };
        let json_entries: Vec<String> = conn.lrange(self.key(session_id), start, -1).await?;
        Ok(apply_window(decode_entries(session_id, &json_entries), None, order))
    }

    async fn clear(&self, session_id: &str) -> Result<usize, HistoryError> {
        let mut conn = self.conn.clone();
        let key = self.key(session_id);
        let (removed, _): (usize, usize) = redis
            ::pipe()
            .atomic()
            .llen(&key)
            .del(&key)
            .query_async(&mut conn).await?;
        Ok(removed)
    }
}
