use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::N8nConfig;
use crate::services::kv_store::SharedStore;
use crate::services::secret_store::{option_key, SecretError, SecretStore};

pub const OPTION_N8N_BASE_URL: &str = "n8n_base_url";
pub const OPTION_N8N_AUTH_TOKEN: &str = "n8n_auth_token";
pub const OPTION_N8N_SHARED_SECRET: &str = "n8n_shared_secret";

/// Effective n8n connection settings after applying environment fallbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N8nSettings {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub shared_secret: Option<String>,
}

/// Partial update from the admin API. `Some("")` clears the persisted value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub n8n_base_url: Option<String>,
    pub n8n_auth_token: Option<String>,
    pub n8n_shared_secret: Option<String>,
}

/// Masked view for admin responses
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SettingsSummary {
    pub n8n_base_url: Option<String>,
    pub auth_token_configured: bool,
    pub shared_secret_configured: bool,
}

/// Persisted plugin settings. Read on every use so admin changes apply at once.
#[derive(Clone)]
pub struct SettingsService {
    store: SharedStore,
    secrets: SecretStore,
    defaults: N8nConfig,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl SettingsService {
    pub fn new(store: SharedStore, secrets: SecretStore, defaults: N8nConfig) -> Self {
        Self {
            store,
            secrets,
            defaults,
        }
    }

    pub async fn base_url(&self) -> Option<String> {
        let persisted = match self.store.get(&option_key(OPTION_N8N_BASE_URL)).await {
            Ok(value) => value.and_then(non_empty),
            Err(e) => {
                warn!("Failed to read n8n base URL option: {}", e);
                None
            }
        };
        persisted.or_else(|| self.defaults.base_url.clone())
    }

    pub async fn auth_token(&self) -> Option<String> {
        non_empty(self.secrets.get_secure_option(OPTION_N8N_AUTH_TOKEN, "").await)
            .or_else(|| self.defaults.auth_token.clone())
    }

    pub async fn shared_secret(&self) -> Option<String> {
        non_empty(self.secrets.get_secure_option(OPTION_N8N_SHARED_SECRET, "").await)
            .or_else(|| self.defaults.shared_secret.clone())
    }

    pub async fn n8n_settings(&self) -> N8nSettings {
        N8nSettings {
            base_url: self.base_url().await,
            auth_token: self.auth_token().await,
            shared_secret: self.shared_secret().await,
        }
    }

    pub async fn summary(&self) -> SettingsSummary {
        let settings = self.n8n_settings().await;
        SettingsSummary {
            n8n_base_url: settings.base_url,
            auth_token_configured: settings.auth_token.is_some(),
            shared_secret_configured: settings.shared_secret.is_some(),
        }
    }

    pub async fn update(&self, update: SettingsUpdate) -> Result<(), SecretError> {
        if let Some(url) = update.n8n_base_url {
            let url = url.trim().trim_end_matches('/').to_string();
            self.store
                .set(&option_key(OPTION_N8N_BASE_URL), &url, None)
                .await?;
            info!(n8n_base_url = %url, "n8n base URL updated");
        }

        if let Some(token) = update.n8n_auth_token {
            self.secrets
                .update_secure_option(OPTION_N8N_AUTH_TOKEN, token.trim())
                .await?;
            info!("n8n auth token updated");
        }

        if let Some(secret) = update.n8n_shared_secret {
            self.secrets
                .update_secure_option(OPTION_N8N_SHARED_SECRET, secret.trim())
                .await?;
            info!("n8n shared secret updated");
        }

        Ok(())
    }
}
