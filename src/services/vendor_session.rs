//! Per-vendor WhatsApp session state and the vendor-facing flows that drive it.
//!
//! State lives in the key-value store as one key per field
//! (`vendor:<id>:<field>`). Multi-field updates are separate writes with no
//! transaction; a concurrent reader may observe a partial update.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::constants::n8n_events;
use crate::services::event_bus::{events, EventBus};
use crate::services::kv_store::{SharedStore, StoreError};
use crate::services::webhook_service::{DispatchError, WebhookEvent, WebhookService};
use crate::utils::phone::{is_valid_phone, sanitize_phone};

pub const VENDOR_KEY_PREFIX: &str = "vendor:";

static INSTANCE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^vendor_(\d+)_whatsapp_instance$").expect("instance name regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    PendingQrScan,
    Qrcode,
    QrScanned,
    Connected,
    Error,
    Unknown,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::PendingQrScan => "pending_qr_scan",
            ConnectionStatus::Qrcode => "qrcode",
            ConnectionStatus::QrScanned => "qr_scanned",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Unknown => "unknown",
        }
    }

    /// Case-insensitive; gateway synonyms (`open`, `close`, `scanning`,
    /// `connecting`) are mapped, anything else becomes `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "disconnected" | "close" | "closed" => ConnectionStatus::Disconnected,
            "pending_qr_scan" | "scanning" => ConnectionStatus::PendingQrScan,
            "qrcode" => ConnectionStatus::Qrcode,
            "qr_scanned" | "connecting" => ConnectionStatus::QrScanned,
            "connected" | "open" => ConnectionStatus::Connected,
            "error" => ConnectionStatus::Error,
            _ => ConnectionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-vendor fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorField {
    ConnectionStatus,
    QrCodeData,
    WhatsappNumber,
    ConnectionInfo,
    LastUpdateTimestamp,
}

impl VendorField {
    fn as_str(&self) -> &'static str {
        match self {
            VendorField::ConnectionStatus => "connection_status",
            VendorField::QrCodeData => "qr_code_data",
            VendorField::WhatsappNumber => "whatsapp_number",
            VendorField::ConnectionInfo => "connection_info",
            VendorField::LastUpdateTimestamp => "last_update_ts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VendorSession {
    pub vendor_id: i64,
    pub session_name: String,
    pub instance_name: String,
    pub connection_status: ConnectionStatus,
    pub qr_code_data: String,
    pub whatsapp_number: String,
    #[schema(value_type = Object)]
    pub connection_info: Value,
    pub last_update_timestamp: i64,
}

pub fn session_name(vendor_id: i64) -> String {
    format!("vendor_{}", vendor_id)
}

pub fn instance_name(vendor_id: i64) -> String {
    format!("vendor_{}_whatsapp_instance", vendor_id)
}

/// Vendor id from `vendor_<id>_whatsapp_instance`
pub fn parse_instance_name(name: &str) -> Option<i64> {
    INSTANCE_NAME_REGEX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|id| id.as_str().parse().ok())
}

fn field_key(vendor_id: i64, field: VendorField) -> String {
    format!("{}{}:{}", VENDOR_KEY_PREFIX, vendor_id, field.as_str())
}

/// Session façade over the key-value store
#[derive(Clone)]
pub struct VendorSessionStore {
    store: SharedStore,
}

impl VendorSessionStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    async fn read(&self, vendor_id: i64, field: VendorField) -> Option<String> {
        match self.store.get(&field_key(vendor_id, field)).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(vendor_id, field = field.as_str(), error = %e, "Failed to read vendor field");
                None
            }
        }
    }

    async fn write(&self, vendor_id: i64, field: VendorField, value: &str) -> Result<(), StoreError> {
        self.store.set(&field_key(vendor_id, field), value, None).await
    }

    /// Stored state with defaults for anything missing
    pub async fn get_vendor_settings(&self, vendor_id: i64) -> VendorSession {
        let connection_status = self
            .read(vendor_id, VendorField::ConnectionStatus)
            .await
            .map(|s| ConnectionStatus::parse(&s))
            .unwrap_or(ConnectionStatus::Disconnected);

        let connection_info = self
            .read(vendor_id, VendorField::ConnectionInfo)
            .await
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| json!({}));

        let last_update_timestamp = self
            .read(vendor_id, VendorField::LastUpdateTimestamp)
            .await
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        VendorSession {
            vendor_id,
            session_name: session_name(vendor_id),
            instance_name: instance_name(vendor_id),
            connection_status,
            qr_code_data: self.read(vendor_id, VendorField::QrCodeData).await.unwrap_or_default(),
            whatsapp_number: self
                .read(vendor_id, VendorField::WhatsappNumber)
                .await
                .unwrap_or_default(),
            connection_info,
            last_update_timestamp,
        }
    }

    /// Single-field write; false on store failure
    pub async fn update_setting(&self, vendor_id: i64, field: VendorField, value: &str) -> bool {
        match self.write(vendor_id, field, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(vendor_id, field = field.as_str(), error = %e, "Failed to update vendor field");
                false
            }
        }
    }

    pub async fn set_status(&self, vendor_id: i64, status: ConnectionStatus) -> bool {
        self.update_setting(vendor_id, VendorField::ConnectionStatus, status.as_str())
            .await
    }

    pub async fn set_qr_code(&self, vendor_id: i64, qr: &str) -> bool {
        self.update_setting(vendor_id, VendorField::QrCodeData, qr).await
    }

    /// Status, info and timestamp as three writes; `connected` also clears the QR
    pub async fn apply_status_update(
        &self,
        vendor_id: i64,
        status: ConnectionStatus,
        connection_info: &Value,
    ) -> Result<(), StoreError> {
        self.write(vendor_id, VendorField::ConnectionStatus, status.as_str())
            .await?;
        self.write(vendor_id, VendorField::ConnectionInfo, &connection_info.to_string())
            .await?;
        self.write(
            vendor_id,
            VendorField::LastUpdateTimestamp,
            &Utc::now().timestamp().to_string(),
        )
        .await?;

        if status == ConnectionStatus::Connected {
            self.write(vendor_id, VendorField::QrCodeData, "").await?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum VendorFlowError {
    #[error("{0} is not a valid phone number")]
    InvalidPhone(String),

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QrRequestResult {
    pub qr_code: Option<String>,
    #[schema(value_type = Object)]
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusCheckResult {
    pub status: ConnectionStatus,
    #[schema(value_type = Object)]
    pub response: Value,
}

/// Consolidated QR + status view. `error` is set on partial failure.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WhatsAppData {
    pub qr_code: String,
    pub status: ConnectionStatus,
    #[schema(value_type = Object)]
    pub connection_info: Value,
    pub error: Option<String>,
}

/// Vendor-facing WhatsApp flows: QR generation, status checks, messaging
#[derive(Clone)]
pub struct VendorWhatsAppService {
    sessions: VendorSessionStore,
    dispatcher: WebhookService,
    events: Arc<EventBus>,
}

impl VendorWhatsAppService {
    pub fn new(sessions: VendorSessionStore, dispatcher: WebhookService, events: Arc<EventBus>) -> Self {
        Self {
            sessions,
            dispatcher,
            events,
        }
    }

    pub fn sessions(&self) -> &VendorSessionStore {
        &self.sessions
    }

    /// Payload of the auto-cached `get_qr_code` / `get_status` reads
    fn cached_read_payload(vendor_id: i64) -> Value {
        json!({
            "vendor_id": vendor_id,
            "instance_name": instance_name(vendor_id),
        })
    }

    /// Drop cached `get_qr_code` / `get_status` answers so the next refresh
    /// does not overwrite newer state with them
    async fn forget_cached_reads(&self, vendor_id: i64) {
        let payload = Self::cached_read_payload(vendor_id);
        for event_type in [n8n_events::GET_QR_CODE, n8n_events::GET_STATUS] {
            if self.dispatcher.forget_cached(event_type, &payload).await {
                debug!(vendor_id, event_type, "Dropped cached read after session change");
            }
        }
    }

    fn emit_transition(&self, vendor_id: i64, previous: ConnectionStatus, current: ConnectionStatus) {
        let data = json!({
            "vendorId": vendor_id,
            "previousStatus": previous,
            "status": current,
        });
        if current == ConnectionStatus::Connected && previous != ConnectionStatus::Connected {
            self.events.trigger_event(events::SESSION_CONNECTED, &data);
        } else if previous == ConnectionStatus::Connected && current != ConnectionStatus::Connected {
            self.events.trigger_event(events::SESSION_DISCONNECTED, &data);
        }
    }

    /// Mark the session pending, ask n8n for a fresh QR and store what comes back
    pub async fn request_qr(&self, vendor_id: i64) -> Result<QrRequestResult, VendorFlowError> {
        let session = session_name(vendor_id);
        info!(vendor_id, session_name = %session, "QR requested for vendor");

        self.sessions
            .set_status(vendor_id, ConnectionStatus::PendingQrScan)
            .await;
        self.sessions.set_qr_code(vendor_id, "").await;
        self.forget_cached_reads(vendor_id).await;

        let payload = json!({
            "eventType": n8n_events::QR_GENERATION,
            "sessionName": session,
            "vendorId": vendor_id,
        });
        self.events.trigger_event(events::BEFORE_QR_GENERATION, &payload);

        let response = match self
            .dispatcher
            .dispatch(&WebhookEvent::new(n8n_events::QR_GENERATION, payload.clone()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(vendor_id, error = %e, "Error requesting QR from n8n");
                self.events.trigger_event(
                    events::QR_GENERATION_ERROR,
                    &json!({ "vendorId": vendor_id, "error": e.to_string() }),
                );
                return Err(e.into());
            }
        };

        let qr_code = response
            .as_json()
            .and_then(|body| {
                body.pointer("/data/qrCodeUrl")
                    .or_else(|| body.pointer("/data/qrCodeImageBase64"))
            })
            .and_then(Value::as_str)
            .filter(|qr| !qr.is_empty())
            .map(str::to_string);

        match &qr_code {
            Some(qr) => {
                self.sessions.set_qr_code(vendor_id, qr).await;
                info!(vendor_id, qr_data_length = qr.len(), "QR code received and stored for vendor");
                self.events.trigger_event(
                    events::QR_GENERATED,
                    &json!({ "vendorId": vendor_id, "qrCode": qr }),
                );
            }
            None => {
                warn!(vendor_id, "No QR code data received from n8n for vendor");
            }
        }

        Ok(QrRequestResult {
            qr_code,
            response: response.into_value(),
        })
    }

    /// Ask n8n for the session status and persist it
    pub async fn check_status(&self, vendor_id: i64) -> Result<StatusCheckResult, VendorFlowError> {
        let session = session_name(vendor_id);
        let payload = json!({
            "eventType": n8n_events::SESSION_STATUS,
            "sessionName": session,
            "vendorId": vendor_id,
        });
        self.events.trigger_event(events::BEFORE_STATUS_CHECK, &payload);

        let previous = self.sessions.get_vendor_settings(vendor_id).await.connection_status;

        let response = match self
            .dispatcher
            .dispatch(&WebhookEvent::new(n8n_events::SESSION_STATUS, payload.clone()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(vendor_id, error = %e, "Error requesting session status from n8n");
                self.events.trigger_event(
                    events::STATUS_CHECK_ERROR,
                    &json!({ "vendorId": vendor_id, "error": e.to_string() }),
                );
                return Err(e.into());
            }
        };

        let body = response.as_json();
        let status = body
            .and_then(|b| b.pointer("/data/status"))
            .and_then(Value::as_str)
            .map(ConnectionStatus::parse)
            .unwrap_or(ConnectionStatus::Unknown);
        self.sessions.set_status(vendor_id, status).await;
        self.forget_cached_reads(vendor_id).await;

        let qr_url = body
            .and_then(|b| b.pointer("/data/qrCodeUrl"))
            .and_then(Value::as_str);
        match (status, qr_url) {
            (ConnectionStatus::Qrcode, Some(qr)) => {
                self.sessions.set_qr_code(vendor_id, qr).await;
                info!(vendor_id, status = %status, "Session awaiting QR scan, QR URL stored");
            }
            _ => {
                self.sessions.set_qr_code(vendor_id, "").await;
                info!(vendor_id, status = %status, "Session status updated");
            }
        }

        self.events.trigger_event(
            events::STATUS_CHECK_COMPLETE,
            &json!({ "vendorId": vendor_id, "status": status }),
        );
        self.emit_transition(vendor_id, previous, status);

        Ok(StatusCheckResult {
            status,
            response: response.into_value(),
        })
    }

    /// Validate the recipient and hand the message to n8n
    pub async fn send_message(
        &self,
        vendor_id: i64,
        to: &str,
        message: &str,
    ) -> Result<Value, VendorFlowError> {
        let to = to.trim();
        if !is_valid_phone(to) {
            return Err(VendorFlowError::InvalidPhone(to.to_string()));
        }
        if message.trim().is_empty() {
            return Err(VendorFlowError::EmptyField("message"));
        }

        info!(vendor_id, to = %to, "Message send requested for vendor");

        let payload = json!({
            "eventType": n8n_events::MESSAGE_SEND,
            "sessionName": session_name(vendor_id),
            "to": to,
            "message": message,
            "vendorId": vendor_id,
        });
        self.events.trigger_event(events::BEFORE_MESSAGE_SEND, &payload);

        match self
            .dispatcher
            .dispatch(&WebhookEvent::new(n8n_events::MESSAGE_SEND, payload.clone()))
            .await
        {
            Ok(response) => {
                let response = response.into_value();
                info!(vendor_id, "Message handed to n8n successfully");
                self.events.trigger_event(
                    events::MESSAGE_SENT,
                    &json!({ "vendorId": vendor_id, "to": to, "response": response }),
                );
                Ok(response)
            }
            Err(e) => {
                error!(vendor_id, error = %e, "Error sending message through n8n");
                self.events.trigger_event(
                    events::MESSAGE_SEND_ERROR,
                    &json!({ "vendorId": vendor_id, "to": to, "error": e.to_string() }),
                );
                Err(e.into())
            }
        }
    }

    /// Combined QR + status refresh through the auto-cached read events.
    /// Partial failures still persist and return what was obtained.
    pub async fn refresh_whatsapp_data(&self, vendor_id: i64) -> WhatsAppData {
        let payload = Self::cached_read_payload(vendor_id);

        let previous = self.sessions.get_vendor_settings(vendor_id).await.connection_status;
        let mut qr_code = String::new();
        let mut status = ConnectionStatus::Disconnected;
        let mut connection_info = json!({});
        let mut errors = Vec::new();

        match self
            .dispatcher
            .send_event_with_auto_cache(n8n_events::GET_QR_CODE, &payload)
            .await
        {
            Ok(response) => {
                qr_code = response
                    .as_json()
                    .and_then(|b| b.get("qr_code").or_else(|| b.pointer("/data/qrCodeUrl")))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.sessions.set_qr_code(vendor_id, &qr_code).await;
                if !qr_code.is_empty() {
                    status = ConnectionStatus::PendingQrScan;
                }
            }
            Err(e) => {
                errors.push(format!("Failed to get QR code: {}", e));
                status = ConnectionStatus::Error;
            }
        }

        match self
            .dispatcher
            .send_event_with_auto_cache(n8n_events::GET_STATUS, &payload)
            .await
        {
            Ok(response) => {
                if let Some(body) = response.as_json() {
                    if let Some(reported) = body
                        .get("status")
                        .or_else(|| body.pointer("/data/status"))
                        .and_then(Value::as_str)
                    {
                        status = ConnectionStatus::parse(reported);
                    }
                    if let Some(info) = body.get("connection_info").filter(|v| v.is_object()) {
                        connection_info = info.clone();
                    }
                }
            }
            Err(e) => {
                errors.push(format!("Failed to get status: {}", e));
                if qr_code.is_empty() {
                    status = ConnectionStatus::Error;
                }
            }
        }

        if let Err(e) = self
            .sessions
            .apply_status_update(vendor_id, status, &connection_info)
            .await
        {
            error!(vendor_id, error = %e, "Failed to persist WhatsApp data for vendor");
            errors.push("Failed to save WhatsApp data".to_string());
        }
        self.emit_transition(vendor_id, previous, status);

        if status == ConnectionStatus::Connected {
            qr_code.clear();
        }

        WhatsAppData {
            qr_code,
            status,
            connection_info,
            error: (!errors.is_empty()).then(|| errors.join(" ")),
        }
    }

    pub async fn save_whatsapp_number(&self, vendor_id: i64, number: &str) -> Result<String, VendorFlowError> {
        let number = sanitize_phone(number.trim());
        if number.is_empty() {
            return Err(VendorFlowError::EmptyField("whatsapp_number"));
        }
        if !is_valid_phone(&number) {
            return Err(VendorFlowError::InvalidPhone(number));
        }

        self.sessions
            .write(vendor_id, VendorField::WhatsappNumber, &number)
            .await?;
        info!(vendor_id, "WhatsApp number saved for vendor");
        Ok(number)
    }

    /// Apply a status pushed by n8n and publish connect/disconnect transitions
    pub async fn record_inbound_status(
        &self,
        vendor_id: i64,
        status: ConnectionStatus,
        connection_info: &Value,
    ) -> Result<(), StoreError> {
        let previous = self.sessions.get_vendor_settings(vendor_id).await.connection_status;
        self.sessions
            .apply_status_update(vendor_id, status, connection_info)
            .await?;
        self.forget_cached_reads(vendor_id).await;
        self.emit_transition(vendor_id, previous, status);
        Ok(())
    }
}
