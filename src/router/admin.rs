//! Admin-only routes, nested under `/api/v1/admin`.

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::app_state::AppState;
use crate::handlers::admin;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/cache", delete(admin::invalidate_event_cache))
        .route("/cache/stats", get(admin::cache_stats))
        .route("/cache/flush", post(admin::flush_cache))
        .route("/cache/cleanup", post(admin::cleanup_cache))
        .route(
            "/settings",
            get(admin::get_settings).put(admin::update_settings),
        )
        .route("/data-wipe", post(admin::data_wipe))
}
