//! Routes without a host session: health, metrics, OpenAPI and the inbound
//! n8n webhook (authenticated by shared secret inside the handler).

use axum::{
    routing::{get, post},
    Json, Router,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::handlers::{self, admin, health, status_webhook, vendor};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(title = "WhatsApp Bridge API", version = "0.1.0"),
    paths(
        health::health_check,
        handlers::metrics::get_prometheus_metrics,
        status_webhook::handle_status_update,
        vendor::issue_nonce,
        vendor::request_qr,
        vendor::session_status,
        vendor::send_message,
        vendor::whatsapp_data,
        vendor::save_whatsapp_number,
        vendor::vendor_settings,
        admin::cache_stats,
        admin::flush_cache,
        admin::cleanup_cache,
        admin::invalidate_event_cache,
        admin::get_settings,
        admin::update_settings,
        admin::data_wipe,
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Service health"),
        (name = "webhooks", description = "Inbound n8n callbacks"),
        (name = "vendor", description = "Vendor WhatsApp session API"),
        (name = "admin", description = "Cache and settings administration"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("Host session token"))
                    .build(),
            ),
        )
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build public routes that don't require a host session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(handlers::metrics::get_prometheus_metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
}

/// Inbound n8n callbacks, nested under `/api/v1`
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/status-update", post(status_webhook::handle_status_update))
}
