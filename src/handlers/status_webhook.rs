//! Inbound status webhook called by n8n when a WhatsApp instance changes state.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::require_shared_secret;
use crate::error::{handle_rejection, ApiError, ErrorCode, Result};
use crate::middleware::metrics::track_status_update;
use crate::services::event_bus::events;
use crate::services::vendor_session::{parse_instance_name, ConnectionStatus};
use crate::AppState;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub instance_name: String,
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub connection_info: Option<Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusUpdateResponse {
    pub success: bool,
    pub message: String,
    pub vendor_id: i64,
    pub new_status: ConnectionStatus,
    /// Status exactly as n8n sent it
    pub reported_status: String,
}

/// Record a connection status pushed by n8n
#[utoipa::path(
    post,
    path = "/api/v1/status-update",
    tag = "webhooks",
    request_body = StatusUpdateRequest,
    params(("X-WWEA-SECRET" = String, Header, description = "Shared secret")),
    responses(
        (status = 200, description = "Status recorded", body = StatusUpdateResponse),
        (status = 400, description = "Malformed body or instance name"),
        (status = 401, description = "Missing, invalid or unconfigured shared secret"),
        (status = 404, description = "Instance does not belong to a vendor")
    )
)]
pub async fn handle_status_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<StatusUpdateResponse>> {
    require_shared_secret(&state.settings, &headers).await?;

    let Json(request) = payload.map_err(handle_rejection)?;

    state.events.trigger_event(
        events::WEBHOOK_RECEIVED,
        &json!({
            "instanceName": request.instance_name,
            "status": request.status,
        }),
    );

    let result = process_status_update(&state, &request).await;

    match &result {
        Ok(response) => {
            state.events.trigger_event(
                events::WEBHOOK_PROCESSED,
                &json!({
                    "vendorId": response.vendor_id,
                    "status": response.new_status,
                }),
            );
        }
        Err(e) => {
            state.events.trigger_event(
                events::WEBHOOK_ERROR,
                &json!({
                    "instanceName": request.instance_name,
                    "error": e.to_string(),
                }),
            );
        }
    }

    result.map(Json)
}

async fn process_status_update(
    state: &AppState,
    request: &StatusUpdateRequest,
) -> Result<StatusUpdateResponse> {
    let instance_name = request.instance_name.trim();
    let vendor_id = parse_instance_name(instance_name).ok_or_else(|| {
        warn!(instance_name = %instance_name, "Status webhook with invalid instance name");
        ApiError::with_code(
            ErrorCode::InvalidInstanceName,
            format!("Invalid instance name format: {}", instance_name),
        )
    })?;

    if !state.vendors.is_vendor(vendor_id).await? {
        warn!(vendor_id, "Status webhook for an unknown vendor");
        return Err(ApiError::not_found("Vendor"));
    }

    let connection_info = match &request.connection_info {
        None | Some(Value::Null) => json!({}),
        Some(info) if info.is_object() => info.clone(),
        Some(_) => {
            return Err(ApiError::validation_field(
                "connection_info",
                "connection_info must be an object",
            ))
        }
    };

    let status = ConnectionStatus::parse(&request.status);
    state
        .whatsapp
        .record_inbound_status(vendor_id, status, &connection_info)
        .await?;

    if status == ConnectionStatus::Unknown {
        warn!(vendor_id, reported = %request.status, "Unrecognised status from n8n stored as unknown");
    }
    track_status_update(status.as_str());
    info!(vendor_id, status = %status, "WhatsApp status updated from n8n");

    Ok(StatusUpdateResponse {
        success: true,
        message: "WhatsApp status updated successfully.".to_string(),
        vendor_id,
        new_status: status,
        reported_status: request.status.trim().to_string(),
    })
}
