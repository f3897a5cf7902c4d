//! Per-context encryption of secrets at rest, one-shot action tokens and
//! salted hashes.
//!
//! Ciphertexts look like `enc:<base64(nonce || ciphertext || tag)>`. Values
//! without the `enc:` prefix are treated as legacy plaintext and returned as-is.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, SecurityConfig};
use crate::services::cache_service::CacheService;
use crate::services::kv_store::{SharedStore, StoreError};
use crate::utils::crypto::{self, KEY_LEN};
use crate::utils::keys::sanitize_key;

pub const ENCRYPTED_PREFIX: &str = "enc:";
pub const OPTION_KEY_PREFIX: &str = "option:";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("invalid key material for context {0}")]
    KeyMaterial(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct ActionToken {
    pub token: String,
    pub action: String,
    /// Unix seconds
    pub expiry: i64,
}

#[derive(Clone)]
pub struct SecretStore {
    store: SharedStore,
    cache: CacheService,
    prefix: String,
    host_salt: String,
    configured_master: Option<String>,
    master: std::sync::Arc<OnceCell<String>>,
    context_keys: std::sync::Arc<DashMap<String, [u8; KEY_LEN]>>,
}

/// Storage key for a persisted option
pub fn option_key(name: &str) -> String {
    format!("{}{}", OPTION_KEY_PREFIX, name)
}

impl SecretStore {
    pub fn new(
        store: SharedStore,
        cache: CacheService,
        cache_config: &CacheConfig,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            store,
            cache,
            prefix: cache_config.prefix.clone(),
            host_salt: security.host_salt.clone(),
            configured_master: security.encryption_secret.clone(),
            master: Default::default(),
            context_keys: Default::default(),
        }
    }

    fn master_key_name(&self) -> String {
        format!("{}master_encryption_key", self.prefix)
    }

    fn context_key_name(&self, context: &str) -> String {
        format!("{}encryption_key_{}", self.prefix, sanitize_key(context))
    }

    /// Configured secret, else the persisted one, else a fresh 256-bit value
    async fn master_secret(&self) -> Result<&str, SecretError> {
        let master = self
            .master
            .get_or_try_init(|| async {
                if let Some(secret) = &self.configured_master {
                    return Ok::<_, SecretError>(secret.clone());
                }

                let name = self.master_key_name();
                if let Some(existing) = self.store.get(&name).await? {
                    return Ok(existing);
                }

                let generated = crypto::random_hex(32);
                self.store.set(&name, &generated, None).await?;
                info!("Generated new master encryption key");
                Ok(generated)
            })
            .await?;
        Ok(master.as_str())
    }

    /// HMAC-SHA256(context || host salt, master), persisted on first use
    async fn context_key(&self, context: &str) -> Result<[u8; KEY_LEN], SecretError> {
        if let Some(key) = self.context_keys.get(context) {
            return Ok(*key);
        }

        let name = self.context_key_name(context);
        let key = match self.store.get(&name).await? {
            Some(stored) => {
                let bytes = hex::decode(&stored)
                    .map_err(|_| SecretError::KeyMaterial(context.to_string()))?;
                <[u8; KEY_LEN]>::try_from(bytes.as_slice())
                    .map_err(|_| SecretError::KeyMaterial(context.to_string()))?
            }
            None => {
                let master = self.master_secret().await?;
                let data = format!("{}{}", context, self.host_salt);
                let key = crypto::hmac_sha256(master.as_bytes(), data.as_bytes())
                    .map_err(|e| SecretError::KeyMaterial(e.to_string()))?;
                self.store.set(&name, &hex::encode(key), None).await?;
                info!(context = %context, "Generated encryption key for context");
                key
            }
        };

        self.context_keys.insert(context.to_string(), key);
        Ok(key)
    }

    /// Encrypt under the context's key with a fresh nonce. Empty input stays empty.
    pub async fn encrypt(&self, context: &str, plaintext: &str) -> Result<String, SecretError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let key = self.context_key(context).await.inspect_err(|e| {
            error!(context = %context, error = %e, "Failed to load encryption key");
        })?;

        let blob = crypto::encrypt(plaintext.as_bytes(), &key).map_err(|e| {
            error!(context = %context, error = %e, "Error encrypting data");
            SecretError::Encrypt(e.to_string())
        })?;

        Ok(format!("{}{}", ENCRYPTED_PREFIX, blob))
    }

    /// Decrypt an `enc:` value; anything else is returned unchanged
    pub async fn decrypt(&self, context: &str, input: &str) -> Result<String, SecretError> {
        let Some(blob) = input.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(input.to_string());
        };

        let key = self.context_key(context).await.inspect_err(|e| {
            error!(context = %context, error = %e, "Failed to load encryption key");
        })?;

        let plaintext = crypto::decrypt(blob, &key).map_err(|e| {
            error!(context = %context, error = %e, "Error decrypting data");
            SecretError::Decrypt(e.to_string())
        })?;

        String::from_utf8(plaintext).map_err(|e| SecretError::Decrypt(e.to_string()))
    }

    /// Encrypt and persist an option under the context `option_<name>`
    pub async fn update_secure_option(&self, name: &str, value: &str) -> Result<(), SecretError> {
        let context = format!("option_{}", name);
        let encrypted = self.encrypt(&context, value).await?;
        self.store.set(&option_key(name), &encrypted, None).await?;
        debug!(option = %name, "Secure option updated");
        Ok(())
    }

    /// Decrypted option value; `default` when unset or undecryptable
    pub async fn get_secure_option(&self, name: &str, default: &str) -> String {
        let stored = match self.store.get(&option_key(name)).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return default.to_string(),
            Err(e) => {
                warn!(option = %name, error = %e, "Failed to read secure option");
                return default.to_string();
            }
        };

        let context = format!("option_{}", name);
        self.decrypt(&context, &stored)
            .await
            .unwrap_or_else(|_| default.to_string())
    }

    /// Random 128-bit token bound to `action`, valid for `ttl`
    pub async fn generate_token(&self, action: &str, ttl: Duration) -> Result<ActionToken, SecretError> {
        let token = ActionToken {
            token: crypto::random_hex(16),
            action: action.to_string(),
            expiry: Utc::now().timestamp() + ttl.as_secs() as i64,
        };

        if !self.cache.set(&token_key(&token.token), &token, Some(ttl)).await {
            return Err(SecretError::Store(StoreError::Unavailable(
                "could not persist token".to_string(),
            )));
        }

        debug!(action = %action, "Token generated");
        Ok(token)
    }

    /// True when the token exists, matches `action` and has not expired.
    /// A mismatched or expired token is deleted.
    pub async fn validate_token(&self, token: &str, action: &str) -> bool {
        let key = token_key(token);
        let Some(data) = self.cache.get::<ActionToken>(&key).await else {
            return false;
        };

        if data.action != action || data.expiry < Utc::now().timestamp() {
            self.cache.delete(&key).await;
            warn!(action = %action, "Rejected token for mismatched action or expiry");
            return false;
        }

        true
    }

    pub async fn invalidate_token(&self, token: &str) -> bool {
        self.cache.delete(&token_key(token)).await
    }

    /// Drop memoized context keys so they are re-derived and re-persisted
    /// after the store was wiped
    pub fn clear_key_cache(&self) {
        self.context_keys.clear();
    }

    /// Hex HMAC-SHA256 of `value || salt` keyed with the host salt
    pub fn generate_hash(&self, value: &str, salt: &str) -> Result<String, SecretError> {
        let data = format!("{}{}", value, salt);
        crypto::hmac_sha256_hex(self.host_salt.as_bytes(), data.as_bytes())
            .map_err(|e| SecretError::KeyMaterial(e.to_string()))
    }

    pub fn verify_hash(&self, value: &str, hash: &str, salt: &str) -> bool {
        let data = format!("{}{}", value, salt);
        crypto::verify_hmac_sha256_hex(self.host_salt.as_bytes(), data.as_bytes(), hash)
    }
}

fn token_key(token: &str) -> String {
    format!("token_{}", sanitize_key(token))
}
