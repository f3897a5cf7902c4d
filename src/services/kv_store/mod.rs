//! Key-value persistence used by the cache, the secret store, the settings
//! service and the vendor session façade.
//!
//! The store only knows strings; callers serialize with `serde_json`. Expiry is
//! optional and honoured on read. Expired entries are not removed by `get`; they
//! stay until deleted or until the backend evicts them itself.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns true if a value was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys starting with `prefix`, expired or not
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Physically remove expired entries. Backends with native expiry keep
    /// the default no-op.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    /// Delete every key starting with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.scan_prefix(prefix).await?;
        let mut removed = 0;
        for key in keys {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Typed helpers on top of the string store
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: serde::Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}
