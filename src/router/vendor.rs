//! Vendor session routes, nested under `/api/v1/vendor`.

use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;
use crate::handlers::vendor;

pub fn vendor_routes() -> Router<AppState> {
    Router::new()
        .route("/nonce", get(vendor::issue_nonce))
        .route("/qr", get(vendor::request_qr))
        .route("/estado-sesion", get(vendor::session_status))
        .route("/enviar-mensaje", post(vendor::send_message))
        .route("/whatsapp-data", get(vendor::whatsapp_data))
        .route("/whatsapp-number", post(vendor::save_whatsapp_number))
        .route("/settings", get(vendor::vendor_settings))
}
