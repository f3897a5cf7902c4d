//! Expiring cache over the key-value store.
//!
//! Every entry has a registry record `{expires, created}` kept in a single JSON
//! document. The registry drives expiry sweeps, full flushes and stats, since
//! not every backend can enumerate cheaply. A record may outlive its value
//! (backend eviction, crashes between writes); sweeps drop such orphans.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::services::kv_store::{get_json, set_json, SharedStore, StoreError};
use crate::utils::keys::sanitize_key;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: i64,
    pub expires_at: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryRecord {
    pub expires: i64,
    pub created: i64,
}

type Registry = BTreeMap<String, RegistryRecord>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub size_estimate_bytes: usize,
    /// RFC 3339 time of the last sweep, `None` if never run
    pub last_cleanup: Option<String>,
}

/// Namespaced, registry-tracked cache
#[derive(Clone)]
pub struct CacheService {
    store: SharedStore,
    prefix: String,
    default_ttl: Duration,
    registry_lock: Arc<Mutex<()>>,
}

impl CacheService {
    pub fn new(store: SharedStore, config: &CacheConfig) -> Self {
        Self {
            store,
            prefix: config.prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            registry_lock: Arc::new(Mutex::new(())),
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}cache:{}", self.prefix, key)
    }

    fn registry_key(&self) -> String {
        format!("{}cache_registry", self.prefix)
    }

    fn last_cleanup_key(&self) -> String {
        format!("{}cache_last_cleanup", self.prefix)
    }

    async fn load_registry(&self) -> Result<Registry, StoreError> {
        Ok(get_json::<Registry>(self.store.as_ref(), &self.registry_key())
            .await?
            .unwrap_or_default())
    }

    async fn save_registry(&self, registry: &Registry) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &self.registry_key(), registry, None).await
    }

    async fn register(&self, key: &str, record: RegistryRecord) -> Result<(), StoreError> {
        let _guard = self.registry_lock.lock().await;
        let mut registry = self.load_registry().await?;
        registry.insert(key.to_string(), record);
        self.save_registry(&registry).await
    }

    async fn unregister(&self, keys: &[String]) -> Result<bool, StoreError> {
        let _guard = self.registry_lock.lock().await;
        let mut registry = self.load_registry().await?;
        let before = registry.len();
        for key in keys {
            registry.remove(key);
        }
        let changed = registry.len() != before;
        if changed {
            self.save_registry(&registry).await?;
        }
        Ok(changed)
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        match get_json::<CacheEntry>(self.store.as_ref(), &self.entry_key(key)).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache GET failed for key {}: {}", key, e);
                None
            }
        }
    }

    /// Store `value` for `ttl` (default TTL when `None`). False on store failure.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let key = sanitize_key(key);
        let ttl = ttl.unwrap_or(self.default_ttl);

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                error!("Cache SET failed for key {}: unserializable value: {}", key, e);
                return false;
            }
        };

        let now = Utc::now().timestamp();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl.as_secs() as i64,
        };

        if let Err(e) = set_json(self.store.as_ref(), &self.entry_key(&key), &entry, Some(ttl)).await {
            error!("Cache SET failed for key {}: {}", key, e);
            return false;
        }

        let record = RegistryRecord {
            expires: entry.expires_at,
            created: entry.created_at,
        };
        if let Err(e) = self.register(&key, record).await {
            error!("Cache registry update failed for key {}: {}", key, e);
            return false;
        }

        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache SET");
        true
    }

    /// Stored value when present, unexpired and of the requested shape
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = sanitize_key(key);
        let now = Utc::now().timestamp();

        match self.read_entry(&key).await {
            Some(entry) if !entry.is_expired(now) => match serde_json::from_value(entry.value) {
                Ok(value) => {
                    debug!("Cache HIT: {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Cache value for key {} has unexpected shape: {}", key, e);
                    None
                }
            },
            _ => {
                debug!("Cache MISS: {}", key);
                None
            }
        }
    }

    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).await.unwrap_or(default)
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get::<Value>(key).await.is_some()
    }

    /// Remove the value and its registry record
    pub async fn delete(&self, key: &str) -> bool {
        let key = sanitize_key(key);

        let removed_value = match self.store.delete(&self.entry_key(&key)).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Cache DELETE failed for key {}: {}", key, e);
                return false;
            }
        };

        let removed_record = match self.unregister(std::slice::from_ref(&key)).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Cache registry update failed for key {}: {}", key, e);
                false
            }
        };

        debug!(key = %key, removed_value, removed_record, "Cache DELETE");
        removed_value || removed_record
    }

    /// Delete every entry whose key starts with `prefix`
    pub async fn delete_by_prefix(&self, prefix: &str) -> usize {
        let prefix = sanitize_key(prefix);
        let namespace = self.entry_key("");
        let keys = match self.store.scan_prefix(&self.entry_key(&prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Cache prefix scan failed for {}: {}", prefix, e);
                return 0;
            }
        };

        let mut removed = Vec::with_capacity(keys.len());
        for store_key in keys {
            match self.store.delete(&store_key).await {
                Ok(true) => {
                    if let Some(key) = store_key.strip_prefix(&namespace) {
                        removed.push(key.to_string());
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Cache DELETE failed for key {}: {}", store_key, e),
            }
        }

        if let Err(e) = self.unregister(&removed).await {
            error!("Cache registry update failed after prefix delete: {}", e);
        }

        info!(prefix = %prefix, count = removed.len(), "Deleted cache entries by prefix");
        removed.len()
    }

    /// Replace the value only if the key is currently cached
    pub async fn update_if_exists<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        if !self.exists(key).await {
            return false;
        }
        self.set(key, value, ttl).await
    }

    /// Cached value, or the producer's result after storing it.
    /// The producer runs at most once per call; concurrent misses each run it.
    pub async fn remember<T, F, Fut>(&self, key: &str, producer: F, ttl: Option<Duration>) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return value;
        }
        let value = producer().await;
        self.set(key, &value, ttl).await;
        value
    }

    /// Sweep expired entries and drop orphaned registry records.
    /// Returns the number of expired entries removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now().timestamp();

        let registry = {
            let _guard = self.registry_lock.lock().await;
            match self.load_registry().await {
                Ok(registry) => registry,
                Err(e) => {
                    error!("Cache cleanup could not read registry: {}", e);
                    return 0;
                }
            }
        };

        let mut expired = Vec::new();
        let mut orphaned = Vec::new();
        for (key, record) in &registry {
            if record.expires <= now {
                if let Err(e) = self.store.delete(&self.entry_key(key)).await {
                    warn!("Cache cleanup DELETE failed for key {}: {}", key, e);
                    continue;
                }
                expired.push(key.clone());
            } else {
                match self.store.get(&self.entry_key(key)).await {
                    Ok(None) => orphaned.push(key.clone()),
                    Ok(Some(_)) => {}
                    Err(e) => warn!("Cache cleanup GET failed for key {}: {}", key, e),
                }
            }
        }

        let stale: Vec<String> = expired.iter().chain(orphaned.iter()).cloned().collect();
        if let Err(e) = self.unregister(&stale).await {
            error!("Cache registry update failed during cleanup: {}", e);
        }

        let stamp = Utc::now().to_rfc3339();
        if let Err(e) = self.store.set(&self.last_cleanup_key(), &stamp, None).await {
            warn!("Failed to record cache cleanup time: {}", e);
        }

        info!(
            cleaned = expired.len(),
            orphans = orphaned.len(),
            "Scheduled cache cleanup completed"
        );
        expired.len()
    }

    /// Ask the backend to drop expired rows that nothing reads any more
    /// (token entries, unregistered keys). Returns the number removed.
    pub async fn purge_backend_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(purged) => {
                debug!(purged, backend = self.store.backend_name(), "Expired store entries purged");
                purged
            }
            Err(e) => {
                warn!("Store purge of expired entries failed: {}", e);
                0
            }
        }
    }

    /// Delete every registered entry and reset the registry
    pub async fn flush_all(&self) -> usize {
        let _guard = self.registry_lock.lock().await;
        let registry = match self.load_registry().await {
            Ok(registry) => registry,
            Err(e) => {
                error!("Cache flush could not read registry: {}", e);
                return 0;
            }
        };

        let mut count = 0;
        for key in registry.keys() {
            match self.store.delete(&self.entry_key(key)).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => warn!("Cache flush DELETE failed for key {}: {}", key, e),
            }
        }

        if let Err(e) = self.save_registry(&Registry::new()).await {
            error!("Cache flush could not reset registry: {}", e);
        }

        warn!(count, "⚠️  Plugin cache flushed");
        count
    }

    pub async fn get_stats(&self) -> CacheStats {
        let now = Utc::now().timestamp();
        let registry = match self.load_registry().await {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Cache stats could not read registry: {}", e);
                Registry::new()
            }
        };

        let total = registry.len();
        let expired = registry.values().filter(|r| r.expires <= now).count();

        let mut size = 0;
        for key in registry.keys() {
            if let Ok(Some(raw)) = self.store.get(&self.entry_key(key)).await {
                size += raw.len();
            }
        }

        let last_cleanup = match self.store.get(&self.last_cleanup_key()).await {
            Ok(stamp) => stamp.filter(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            Err(e) => {
                warn!("Cache stats could not read last cleanup: {}", e);
                None
            }
        };

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            size_estimate_bytes: size,
            last_cleanup,
        }
    }

    /// Raw registry snapshot
    pub async fn registry(&self) -> BTreeMap<String, RegistryRecord> {
        self.load_registry().await.unwrap_or_default()
    }
}
