//! Vendor-facing WhatsApp API.
//!
//! Every route except `/nonce` requires both the host session and a valid
//! `X-WWEA-Nonce`; `/nonce` issues that token.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::{vendor_nonce_action, AuthenticatedVendor, SessionVendor};
use crate::error::{handle_rejection, ApiError, Result};
use crate::handlers::response::ApiResponse;
use crate::services::secret_store::ActionToken;
use crate::services::vendor_session::{
    QrRequestResult, StatusCheckResult, VendorFlowError, VendorSession, WhatsAppData,
};
use crate::AppState;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 32))]
    pub to: String,
    #[validate(length(min = 1, max = 4096))]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct WhatsAppNumberRequest {
    #[validate(length(max = 32))]
    pub whatsapp_number: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WhatsAppNumberResponse {
    pub whatsapp_number: String,
}

/// Report a phone validation failure against the request field it came from
fn flow_error(field: &str) -> impl Fn(VendorFlowError) -> ApiError + '_ {
    move |e| match e {
        VendorFlowError::InvalidPhone(_) => ApiError::invalid_phone(field),
        other => other.into(),
    }
}

/// Issue a CSRF token for subsequent vendor calls
#[utoipa::path(
    get,
    path = "/api/v1/vendor/nonce",
    tag = "vendor",
    responses(
        (status = 200, description = "Nonce issued", body = ActionToken),
        (status = 401, description = "Not a vendor session")
    ),
    security(("bearer_auth" = []))
)]
pub async fn issue_nonce(
    State(state): State<AppState>,
    vendor: SessionVendor,
) -> Result<ApiResponse<ActionToken>> {
    let ttl = Duration::from_secs(state.config.security.nonce_ttl_secs);
    let token = state
        .secrets
        .generate_token(&vendor_nonce_action(vendor.vendor_id), ttl)
        .await?;
    info!(vendor_id = vendor.vendor_id, "Vendor nonce issued");
    Ok(ApiResponse::success(token))
}

/// Request a new QR code for the vendor's WhatsApp session
#[utoipa::path(
    get,
    path = "/api/v1/vendor/qr",
    tag = "vendor",
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "QR generation requested", body = QrRequestResult),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce"),
        (status = 502, description = "n8n error")
    ),
    security(("bearer_auth" = []))
)]
pub async fn request_qr(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
) -> Result<ApiResponse<QrRequestResult>> {
    let result = state.whatsapp.request_qr(vendor.vendor_id()).await?;
    Ok(ApiResponse::success_with_message(
        result,
        "QR generation request sent to n8n.",
    ))
}

/// Ask n8n for the current session status
#[utoipa::path(
    get,
    path = "/api/v1/vendor/estado-sesion",
    tag = "vendor",
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "Status refreshed", body = StatusCheckResult),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce"),
        (status = 502, description = "n8n error")
    ),
    security(("bearer_auth" = []))
)]
pub async fn session_status(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
) -> Result<ApiResponse<StatusCheckResult>> {
    let result = state.whatsapp.check_status(vendor.vendor_id()).await?;
    Ok(ApiResponse::success_with_message(
        result,
        "Session status request sent to n8n.",
    ))
}

/// Send a WhatsApp message from the vendor's session
#[utoipa::path(
    post,
    path = "/api/v1/vendor/enviar-mensaje",
    tag = "vendor",
    request_body = SendMessageRequest,
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "Message handed to n8n"),
        (status = 400, description = "Invalid recipient or message"),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce"),
        (status = 502, description = "n8n error")
    ),
    security(("bearer_auth" = []))
)]
pub async fn send_message(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<ApiResponse<Value>> {
    let Json(request) = payload.map_err(handle_rejection)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let response = state
        .whatsapp
        .send_message(vendor.vendor_id(), &request.to, &request.message)
        .await
        .map_err(flow_error("to"))?;

    Ok(ApiResponse::success_with_message(
        response,
        "Message send request sent to n8n.",
    ))
}

/// Consolidated QR code and status, through the response cache
#[utoipa::path(
    get,
    path = "/api/v1/vendor/whatsapp-data",
    tag = "vendor",
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "Current WhatsApp data", body = WhatsAppData),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce")
    ),
    security(("bearer_auth" = []))
)]
pub async fn whatsapp_data(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
) -> Result<ApiResponse<WhatsAppData>> {
    let data = state.whatsapp.refresh_whatsapp_data(vendor.vendor_id()).await;
    Ok(ApiResponse::success(data))
}

/// Save the vendor's own WhatsApp number
#[utoipa::path(
    post,
    path = "/api/v1/vendor/whatsapp-number",
    tag = "vendor",
    request_body = WhatsAppNumberRequest,
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "Number saved", body = WhatsAppNumberResponse),
        (status = 400, description = "Empty or invalid number"),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce")
    ),
    security(("bearer_auth" = []))
)]
pub async fn save_whatsapp_number(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
    payload: std::result::Result<Json<WhatsAppNumberRequest>, JsonRejection>,
) -> Result<ApiResponse<WhatsAppNumberResponse>> {
    let Json(request) = payload.map_err(handle_rejection)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    let whatsapp_number = state
        .whatsapp
        .save_whatsapp_number(vendor.vendor_id(), &request.whatsapp_number)
        .await
        .map_err(flow_error("whatsapp_number"))?;

    Ok(ApiResponse::success_with_message(
        WhatsAppNumberResponse { whatsapp_number },
        "WhatsApp number saved.",
    ))
}

/// Stored session fields for the vendor
#[utoipa::path(
    get,
    path = "/api/v1/vendor/settings",
    tag = "vendor",
    params(("X-WWEA-Nonce" = String, Header, description = "CSRF token")),
    responses(
        (status = 200, description = "Vendor WhatsApp settings", body = VendorSession),
        (status = 401, description = "Not a vendor session"),
        (status = 403, description = "Invalid nonce")
    ),
    security(("bearer_auth" = []))
)]
pub async fn vendor_settings(
    State(state): State<AppState>,
    vendor: AuthenticatedVendor,
) -> Result<ApiResponse<VendorSession>> {
    let settings = state
        .whatsapp
        .sessions()
        .get_vendor_settings(vendor.vendor_id())
        .await;
    Ok(ApiResponse::success(settings))
}
