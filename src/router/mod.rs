//! Router configuration.

use axum::{http::StatusCode, middleware, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::app_state::AppState;
use crate::constants::timeouts::REQUEST_TIMEOUT_SECS;
use crate::middleware::{metrics_middleware, request_logger_middleware};

mod admin;
mod public;
mod vendor;

pub use admin::admin_routes;
pub use public::{public_routes, webhook_routes, ApiDoc};
pub use vendor::vendor_routes;

/// Build the application router.
pub fn build_router(app_state: AppState) -> Router {
    let v1_api = webhook_routes()
        .nest("/vendor", vendor_routes())
        .nest("/admin", admin_routes());

    public_routes()
        .nest("/api/v1", v1_api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logger_middleware))
                .layer(middleware::from_fn(metrics_middleware))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(REQUEST_TIMEOUT_SECS),
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}
