//! Admin API: cache maintenance, n8n settings and data wipe.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::AdminUser;
use crate::error::{handle_rejection, ApiError, Result};
use crate::handlers::response::ApiResponse;
use crate::services::cache_service::CacheStats;
use crate::services::secret_store::OPTION_KEY_PREFIX;
use crate::services::settings_service::{SettingsSummary, SettingsUpdate};
use crate::services::vendor_session::VENDOR_KEY_PREFIX;
use crate::AppState;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct InvalidateQuery {
    /// Event type whose cached responses are dropped; omit to drop every
    /// cached n8n response
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SettingsUpdateRequest {
    pub n8n_base_url: Option<String>,
    pub n8n_auth_token: Option<String>,
    pub n8n_shared_secret: Option<String>,
}

impl From<SettingsUpdateRequest> for SettingsUpdate {
    fn from(request: SettingsUpdateRequest) -> Self {
        SettingsUpdate {
            n8n_base_url: request.n8n_base_url,
            n8n_auth_token: request.n8n_auth_token,
            n8n_shared_secret: request.n8n_shared_secret,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DataWipeResponse {
    pub cache_keys: usize,
    pub option_keys: usize,
    pub vendor_keys: usize,
}

/// Cache statistics
#[utoipa::path(
    get,
    path = "/api/v1/admin/cache/stats",
    tag = "admin",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStats),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cache_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<ApiResponse<CacheStats>> {
    Ok(ApiResponse::success(state.cache.get_stats().await))
}

/// Drop every cache entry
#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/flush",
    tag = "admin",
    responses(
        (status = 200, description = "Cache flushed", body = CountResponse),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn flush_cache(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<ApiResponse<CountResponse>> {
    let count = state.cache.flush_all().await;
    info!(admin = %admin.0.sub, count, "Cache flushed by admin");
    Ok(ApiResponse::success_with_message(
        CountResponse { count },
        "Cache flushed.",
    ))
}

/// Run the expired-entry sweep now
#[utoipa::path(
    post,
    path = "/api/v1/admin/cache/cleanup",
    tag = "admin",
    responses(
        (status = 200, description = "Expired entries removed", body = CountResponse),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn cleanup_cache(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<ApiResponse<CountResponse>> {
    let count = state.cache.cleanup_expired().await;
    Ok(ApiResponse::success(CountResponse { count }))
}

/// Drop the cached n8n responses for one event type, or all of them
#[utoipa::path(
    delete,
    path = "/api/v1/admin/cache",
    tag = "admin",
    params(InvalidateQuery),
    responses(
        (status = 200, description = "Cached responses dropped", body = CountResponse),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn invalidate_event_cache(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<InvalidateQuery>,
) -> Result<ApiResponse<CountResponse>> {
    let event_type = query.event_type.unwrap_or_default();
    let count = state.dispatcher.invalidate_cache(event_type.trim()).await;
    Ok(ApiResponse::success(CountResponse { count }))
}

/// Current n8n settings with secrets masked
#[utoipa::path(
    get,
    path = "/api/v1/admin/settings",
    tag = "admin",
    responses(
        (status = 200, description = "n8n settings", body = SettingsSummary),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<ApiResponse<SettingsSummary>> {
    Ok(ApiResponse::success(state.settings.summary().await))
}

/// Update n8n settings. Omitted fields are left unchanged, empty strings clear.
#[utoipa::path(
    put,
    path = "/api/v1/admin/settings",
    tag = "admin",
    request_body = SettingsUpdateRequest,
    responses(
        (status = 200, description = "Settings updated", body = SettingsSummary),
        (status = 400, description = "Invalid base URL"),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    State(state): State<AppState>,
    admin: AdminUser,
    payload: std::result::Result<Json<SettingsUpdateRequest>, JsonRejection>,
) -> Result<ApiResponse<SettingsSummary>> {
    let Json(request) = payload.map_err(handle_rejection)?;

    if let Some(url) = request.n8n_base_url.as_deref().map(str::trim) {
        if !url.is_empty() && reqwest::Url::parse(url).is_err() {
            return Err(ApiError::validation_field(
                "n8n_base_url",
                "n8n_base_url must be an absolute URL",
            ));
        }
    }

    state.settings.update(request.into()).await?;
    info!(admin = %admin.0.sub, "n8n settings updated by admin");

    Ok(ApiResponse::success_with_message(
        state.settings.summary().await,
        "Settings saved.",
    ))
}

/// Remove every key this service owns: cache, options and vendor fields
#[utoipa::path(
    post,
    path = "/api/v1/admin/data-wipe",
    tag = "admin",
    responses(
        (status = 200, description = "All plugin data removed", body = DataWipeResponse),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer_auth" = []))
)]
pub async fn data_wipe(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<ApiResponse<DataWipeResponse>> {
    let cache_keys = state
        .store
        .delete_prefix(&state.config.cache.prefix)
        .await?;
    let option_keys = state.store.delete_prefix(OPTION_KEY_PREFIX).await?;
    let vendor_keys = state.store.delete_prefix(VENDOR_KEY_PREFIX).await?;
    state.secrets.clear_key_cache();

    warn!(
        admin = %admin.0.sub,
        cache_keys,
        option_keys,
        vendor_keys,
        "⚠️  All plugin data wiped"
    );

    Ok(ApiResponse::success_with_message(
        DataWipeResponse {
            cache_keys,
            option_keys,
            vendor_keys,
        },
        "All plugin data removed.",
    ))
}
