// Business logic services
// Cache, event bus, secrets, n8n dispatch, vendor sessions

pub mod cache_service;
pub mod cache_sweeper;
pub mod event_bus;
pub mod kv_store;
pub mod secret_store;
pub mod settings_service;
pub mod vendor_directory;
pub mod vendor_session;
pub mod webhook_service;

pub use cache_service::{CacheService, CacheStats};
pub use cache_sweeper::{CacheSweeper, CacheSweeperConfig};
pub use event_bus::{observer, EventBus, ObserverFn};
pub use kv_store::{KeyValueStore, MemoryStore, PostgresStore, RedisStore, SharedStore};
pub use secret_store::{ActionToken, SecretError, SecretStore};
pub use settings_service::{SettingsService, SettingsUpdate};
pub use vendor_directory::{PgVendorDirectory, StaticVendorDirectory, VendorDirectory};
pub use vendor_session::{
    ConnectionStatus, VendorFlowError, VendorSession, VendorSessionStore, VendorWhatsAppService,
};
pub use webhook_service::{DispatchError, DispatchResponse, WebhookService, WriteClassifier};
