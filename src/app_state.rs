//! Application state shared across all handlers.

use axum::extract::FromRef;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::auth::JwtService;
use crate::config::Config;
use crate::services::{
    CacheService, EventBus, SecretStore, SettingsService, SharedStore, VendorDirectory,
    VendorSessionStore, VendorWhatsAppService, WebhookService,
};
use crate::services::webhook_service::DispatchError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Key-value persistence backing every service below
    pub store: SharedStore,
    /// Expiring response cache
    pub cache: CacheService,
    /// In-process observer registry
    pub events: Arc<EventBus>,
    /// Encrypted options and action tokens
    pub secrets: SecretStore,
    /// n8n connection settings
    pub settings: SettingsService,
    /// Outbound n8n webhook dispatcher
    pub dispatcher: WebhookService,
    /// Vendor WhatsApp flows
    pub whatsapp: VendorWhatsAppService,
    /// Vendor identity lookup
    pub vendors: Arc<dyn VendorDirectory>,
    /// Host session verification
    pub jwt_service: JwtService,
    /// Prometheus renderer; absent when no recorder was installed
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire every service on top of an existing store and vendor directory
    pub fn build(
        config: Config,
        store: SharedStore,
        vendors: Arc<dyn VendorDirectory>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Result<Self, DispatchError> {
        let events = Arc::new(EventBus::new());
        let cache = CacheService::new(store.clone(), &config.cache);
        let secrets = SecretStore::new(
            store.clone(),
            cache.clone(),
            &config.cache,
            &config.security,
        );
        let settings = SettingsService::new(store.clone(), secrets.clone(), config.n8n.clone());
        let dispatcher = WebhookService::new(
            settings.clone(),
            cache.clone(),
            events.clone(),
            &config.n8n,
            &config.cache,
        )?;
        let whatsapp = VendorWhatsAppService::new(
            VendorSessionStore::new(store.clone()),
            dispatcher.clone(),
            events.clone(),
        );
        let jwt_service = JwtService::new(&config.jwt_secret, config.jwt_issuer.clone());

        Ok(Self {
            config,
            store,
            cache,
            events,
            secrets,
            settings,
            dispatcher,
            whatsapp,
            vendors,
            jwt_service,
            metrics_handle,
        })
    }
}

impl FromRef<AppState> for CacheService {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.cache.clone()
    }
}

impl FromRef<AppState> for SettingsService {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.settings.clone()
    }
}

impl FromRef<AppState> for Arc<EventBus> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.events.clone()
    }
}
