use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub n8n: N8nConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    /// Vendor ids accepted by the static vendor directory (memory/redis backends)
    pub vendor_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines; anything else is human readable.
    /// Read before `Config::from_env` so the subscriber exists while config loads.
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Outbound n8n endpoint. Values here are the fallbacks used when the
/// persisted settings have not been set through the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N8nConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    /// Shared secret for `X-WWEA-SECRET` on inbound calls and for signing outbound ones
    pub shared_secret: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for N8nConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            shared_secret: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prepended to every cache key
    pub prefix: String,
    pub default_ttl_secs: u64,
    pub dispatch_ttl_secs: u64,
    /// TTL for the long-lived read events (status, instance info, QR)
    pub long_ttl_secs: u64,
    pub cleanup_enabled: bool,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "wwea_".to_string(),
            default_ttl_secs: 3600,
            dispatch_ttl_secs: 300,
            long_ttl_secs: 900,
            cleanup_enabled: true,
            cleanup_interval_secs: 86_400, // daily
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Optional master secret. When absent one is generated and persisted.
    pub encryption_secret: Option<String>,
    /// Host salt mixed into per-context key derivation and hashes
    pub host_salt: String,
    pub nonce_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_secret: None,
            host_salt: "wwea-default-host-salt".to_string(),
            nonce_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
    Postgres,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redis" => Ok(StorageBackend::Redis),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(anyhow!("Unknown STORAGE_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            redis_url: None,
            database_url: None,
            max_connections: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            port: 8080,
            log_format: LogFormat::Pretty,
            jwt_secret: "development-jwt-secret-change-me".to_string(),
            jwt_issuer: "whatsapp-bridge".to_string(),
            n8n: N8nConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            vendor_ids: Vec::new(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Failed to parse {}: {}, using default", name, val);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();

        let storage = StorageConfig {
            backend: StorageBackend::parse(
                &env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string()),
            )?,
            redis_url: optional_var("REDIS_URL"),
            database_url: optional_var("DATABASE_URL"),
            max_connections: parse_or("MAX_CONNECTIONS", 10),
        };

        let vendor_ids = env::var("VENDOR_IDS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| match s.trim().parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring invalid vendor id in VENDOR_IDS: {}", s);
                    None
                }
            })
            .collect();

        let config = Config {
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            port: parse_or("PORT", defaults.port),
            log_format: LogFormat::from_env(),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            n8n: N8nConfig {
                base_url: optional_var("N8N_BASE_URL"),
                auth_token: optional_var("N8N_AUTH_TOKEN"),
                shared_secret: optional_var("N8N_SHARED_SECRET"),
                request_timeout_secs: parse_or("N8N_REQUEST_TIMEOUT_SECS", 30),
            },
            cache: CacheConfig {
                prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.cache.prefix),
                default_ttl_secs: parse_or("CACHE_DEFAULT_TTL_SECS", 3600),
                dispatch_ttl_secs: parse_or("CACHE_DISPATCH_TTL_SECS", 300),
                long_ttl_secs: parse_or("CACHE_LONG_TTL_SECS", 900),
                cleanup_enabled: parse_or("CACHE_CLEANUP_ENABLED", true),
                cleanup_interval_secs: parse_or("CACHE_CLEANUP_INTERVAL_SECS", 86_400),
            },
            security: SecurityConfig {
                encryption_secret: optional_var("ENCRYPTION_SECRET"),
                host_salt: env::var("HOST_SALT").unwrap_or(defaults.security.host_salt),
                nonce_ttl_secs: parse_or("NONCE_TTL_SECS", 3600),
            },
            storage,
            vendor_ids,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements and warn about weak settings
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend {
            StorageBackend::Redis if self.storage.redis_url.is_none() => {
                return Err(anyhow!("REDIS_URL is required when STORAGE_BACKEND=redis"));
            }
            StorageBackend::Postgres if self.storage.database_url.is_none() => {
                return Err(anyhow!(
                    "DATABASE_URL is required when STORAGE_BACKEND=postgres"
                ));
            }
            _ => {}
        }

        if self.jwt_secret.len() < 32 {
            warn!("JWT_SECRET is shorter than 32 characters");
        }

        if self.n8n.base_url.is_none() {
            info!("N8N_BASE_URL not set; dispatch requires it to be configured via the admin API");
        }

        if self.n8n.shared_secret.is_none() {
            warn!("N8N_SHARED_SECRET not set; inbound status webhooks will be rejected until configured");
        }

        if self.environment == "production" && self.security.host_salt == SecurityConfig::default().host_salt {
            warn!("🚨 SECURITY WARNING: HOST_SALT is using the built-in default in production!");
        }

        Ok(())
    }
}
