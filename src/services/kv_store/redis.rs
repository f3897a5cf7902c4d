use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{KeyValueStore, StoreError};

const SCAN_BATCH: usize = 200;

/// Redis-backed store. Expiry is delegated to Redis (`SET EX`).
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        info!("Initializing Redis key-value store");

        let client = Client::open(redis_url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        let store = Self { connection_manager };
        store.ping().await?;

        info!("✅ Redis store connection established");
        Ok(store)
    }
}

/// Escape glob metacharacters so a literal prefix can be used with `MATCH`
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();

        let result: RedisResult<()> = match ttl {
            // Redis rejects EX 0, so round sub-second TTLs up
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
            None => conn.set(key, value).await,
        };

        match result {
            Ok(()) => {
                debug!("Store SET: {} (TTL: {:?})", key, ttl);
                Ok(())
            }
            Err(e) => {
                error!("Store SET failed for key {}: {}", key, e);
                Err(e.into())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let pattern = glob_escape(prefix);

        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
