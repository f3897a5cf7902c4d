//! Application startup and initialization logic.

use anyhow::{anyhow, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::info;

use crate::app_state::AppState;
use crate::config::{Config, StorageBackend};
use crate::database;
use crate::services::{
    MemoryStore, PgVendorDirectory, PostgresStore, RedisStore, SharedStore, StaticVendorDirectory,
    VendorDirectory,
};

/// Open the configured storage backend and create the AppState.
pub async fn initialize_app(config: &Config, metrics_handle: Option<PrometheusHandle>) -> Result<AppState> {
    info!(
        backend = ?config.storage.backend,
        environment = %config.environment,
        "🚀 Starting WhatsApp bridge"
    );

    let (store, vendors): (SharedStore, Arc<dyn VendorDirectory>) = match config.storage.backend {
        StorageBackend::Memory => {
            info!("✅ In-memory store initialized (data is lost on restart)");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(StaticVendorDirectory::new(config.vendor_ids.iter().copied())),
            )
        }
        StorageBackend::Redis => {
            let url = config
                .storage
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow!("REDIS_URL is required for the redis backend"))?;
            let store = RedisStore::new(url).await?;
            info!("✅ Redis store initialized");
            (
                Arc::new(store),
                Arc::new(StaticVendorDirectory::new(config.vendor_ids.iter().copied())),
            )
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL is required for the postgres backend"))?;
            let pool = database::setup_database(url, config.storage.max_connections).await?;
            database::run_migrations(&pool).await?;
            info!("✅ PostgreSQL store initialized");
            (
                Arc::new(PostgresStore::new(pool.clone())),
                Arc::new(PgVendorDirectory::new(pool)),
            )
        }
    };

    let state = AppState::build(config.clone(), store, vendors, metrics_handle)?;
    info!("✅ Cache, secret store and event bus initialized");
    info!("✅ Webhook dispatcher initialized");
    info!(
        "✅ {} standard events registered",
        state.events.available_events().len()
    );

    Ok(state)
}
