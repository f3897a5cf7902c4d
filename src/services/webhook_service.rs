//! Outbound n8n webhook dispatcher.
//!
//! Every call is a `POST <base_url>/<slug(event_type)>` with the payload as the
//! JSON body. Read-type events may be answered from the cache; write-type
//! events always go to the network. Lifecycle events are published on the
//! event bus at each step.

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, N8nConfig};
use crate::middleware::metrics::{track_dispatch_cache_hit, track_webhook_dispatch};
use crate::services::cache_service::CacheService;
use crate::services::event_bus::{events, EventBus};
use crate::services::settings_service::SettingsService;
use crate::utils::crypto::hmac_sha256_hex;
use crate::utils::keys::{dispatch_cache_key, dispatch_cache_prefix, slugify, DISPATCH_CACHE_NAMESPACE};

pub const HEADER_TIMESTAMP: &str = "X-WWEA-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-WWEA-Signature";

/// Event types with side effects outside this service
const WRITE_OPERATIONS: &[&str] = &[
    "send_message",
    "create_instance",
    "delete_instance",
    "logout_instance",
    "update_profile",
    "group_create",
    "group_update",
    "group_leave",
    "restart",
    "update_settings",
];

const WRITE_PREFIXES: &[&str] = &["send_", "create_", "update_", "delete_", "modify_", "set_"];

/// Read events that change slowly and get the long cache TTL
const LONG_TTL_EVENTS: &[&str] = &["get_status", "get_instance_info", "get_qr_code"];

/// Override for write/read classification. Receives the event type, the
/// payload and the built-in verdict; returns the final verdict.
pub type WriteClassifier = Arc<dyn Fn(&str, &Value, bool) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("n8n configuration error: {0}")]
    Config(String),

    #[error("n8n request failed: {0}")]
    Transport(String),

    #[error("n8n returned HTTP {status}")]
    Response { status: u16, body: String },
}

/// Successful dispatch result. `Raw` carries a 2xx body that was not JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResponse {
    Json(Value),
    Raw(String),
}

impl DispatchResponse {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DispatchResponse::Json(value) => Some(value),
            DispatchResponse::Raw(_) => None,
        }
    }

    /// JSON as-is; a raw body becomes a JSON string
    pub fn into_value(self) -> Value {
        match self {
            DispatchResponse::Json(value) => value,
            DispatchResponse::Raw(body) => Value::String(body),
        }
    }
}

/// One outbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: Value,
    pub use_cache: bool,
    pub cache_ttl_secs: u64,
}

impl WebhookEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            use_cache: false,
            cache_ttl_secs: 300,
        }
    }

    pub fn cached(mut self, ttl_secs: u64) -> Self {
        self.use_cache = true;
        self.cache_ttl_secs = ttl_secs;
        self
    }
}

#[derive(Clone)]
pub struct WebhookService {
    client: Client,
    settings: SettingsService,
    cache: CacheService,
    events: Arc<EventBus>,
    classifier: Option<WriteClassifier>,
    default_ttl: Duration,
    long_ttl: Duration,
}

impl WebhookService {
    pub fn new(
        settings: SettingsService,
        cache: CacheService,
        events: Arc<EventBus>,
        n8n: &N8nConfig,
        cache_config: &CacheConfig,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(n8n.request_timeout_secs))
            .build()
            .map_err(|e| {
                error!("Failed to build n8n HTTP client: {}", e);
                DispatchError::Config(format!("could not build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            settings,
            cache,
            events,
            classifier: None,
            default_ttl: Duration::from_secs(cache_config.dispatch_ttl_secs),
            long_ttl: Duration::from_secs(cache_config.long_ttl_secs),
        })
    }

    pub fn with_write_classifier(mut self, classifier: WriteClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Built-in list and prefixes, then the injected classifier if any
    pub fn is_write_operation(&self, event_type: &str, payload: &Value) -> bool {
        let verdict = WRITE_OPERATIONS.contains(&event_type)
            || WRITE_PREFIXES.iter().any(|p| event_type.starts_with(p));

        match &self.classifier {
            Some(classifier) => classifier(event_type, payload, verdict),
            None => verdict,
        }
    }

    /// Send one prepared event
    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchResponse, DispatchError> {
        self.send_event(
            &event.event_type,
            &event.payload,
            event.use_cache,
            Duration::from_secs(event.cache_ttl_secs),
        )
        .await
    }

    pub async fn send_event(
        &self,
        event_type: &str,
        payload: &Value,
        use_cache: bool,
        cache_ttl: Duration,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = Instant::now();
        let result = self.send_event_inner(event_type, payload, use_cache, cache_ttl).await;

        let outcome = match &result {
            Ok(DispatchResponse::Json(_)) => "success",
            Ok(DispatchResponse::Raw(_)) => "raw",
            Err(DispatchError::Config(_)) => "config_error",
            Err(DispatchError::Transport(_)) => "transport_error",
            Err(DispatchError::Response { .. }) => "http_error",
        };
        track_webhook_dispatch(event_type, outcome, started.elapsed());

        result
    }

    async fn send_event_inner(
        &self,
        event_type: &str,
        payload: &Value,
        use_cache: bool,
        cache_ttl: Duration,
    ) -> Result<DispatchResponse, DispatchError> {
        let settings = self.settings.n8n_settings().await;

        let Some(base_url) = settings.base_url else {
            error!(event_type = %event_type, "n8n base URL is not configured");
            return Err(DispatchError::Config(
                "The n8n base URL is not configured".to_string(),
            ));
        };

        let url = format!("{}/{}", base_url.trim_end_matches('/'), slugify(event_type));

        self.events.trigger_event(
            events::BEFORE_SEND,
            &json!({ "eventType": event_type, "payload": payload, "url": url }),
        );

        let cache_key = if use_cache && !self.is_write_operation(event_type, payload) {
            Some(dispatch_cache_key(event_type, payload))
        } else {
            None
        };

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get::<Value>(key).await {
                debug!(event_type = %event_type, cache_key = %key, "Dispatch served from cache");
                track_dispatch_cache_hit(event_type);
                self.events.trigger_event(
                    events::CACHE_HIT,
                    &json!({ "eventType": event_type, "cacheKey": key }),
                );
                return Ok(DispatchResponse::Json(cached));
            }
            self.events.trigger_event(
                events::CACHE_MISS,
                &json!({ "eventType": event_type, "cacheKey": key }),
            );
        }

        let body = payload.to_string();
        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(token) = &settings.auth_token {
            request = request.bearer_auth(token);
        }

        if let Some(secret) = &settings.shared_secret {
            let timestamp = Utc::now().timestamp().to_string();
            let signed = format!("{}.{}", timestamp, body);
            match hmac_sha256_hex(secret.as_bytes(), signed.as_bytes()) {
                Ok(signature) => {
                    request = request
                        .header(HEADER_TIMESTAMP, timestamp)
                        .header(HEADER_SIGNATURE, signature);
                }
                Err(e) => warn!("Could not sign outbound webhook: {}", e),
            }
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(event_type = %event_type, url = %url, error = %e, "Error sending event to n8n");
                self.events.trigger_event(
                    events::REQUEST_ERROR,
                    &json!({ "eventType": event_type, "payload": payload, "error": e.to_string() }),
                );
                return Err(DispatchError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                error!(event_type = %event_type, error = %e, "Error reading n8n response body");
                self.events.trigger_event(
                    events::REQUEST_ERROR,
                    &json!({ "eventType": event_type, "payload": payload, "error": e.to_string() }),
                );
                return Err(DispatchError::Transport(e.to_string()));
            }
        };

        if !status.is_success() {
            error!(
                event_type = %event_type,
                http_code = status.as_u16(),
                response_body = %text,
                "n8n returned an HTTP error"
            );
            self.events.trigger_event(
                events::HTTP_ERROR,
                &json!({ "eventType": event_type, "httpCode": status.as_u16(), "body": text }),
            );
            return Err(DispatchError::Response {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    event_type = %event_type,
                    http_code = status.as_u16(),
                    response_body = %text,
                    "n8n response is not valid JSON"
                );
                self.events.trigger_event(
                    events::INVALID_RESPONSE,
                    &json!({ "eventType": event_type, "body": text }),
                );
                return Ok(DispatchResponse::Raw(text));
            }
        };

        if let Some(key) = &cache_key {
            if self.cache.set(key, &parsed, Some(cache_ttl)).await {
                self.events.trigger_event(
                    events::CACHE_SET,
                    &json!({ "eventType": event_type, "cacheKey": key, "ttl": cache_ttl.as_secs() }),
                );
            }
        }

        info!(event_type = %event_type, "Event sent to n8n successfully");
        self.events.trigger_event(
            events::REQUEST_SUCCESS,
            &json!({ "eventType": event_type, "response": parsed }),
        );

        Ok(DispatchResponse::Json(parsed))
    }

    /// Cache reads only; long TTL for the slow-changing read events
    pub async fn send_event_with_auto_cache(
        &self,
        event_type: &str,
        payload: &Value,
    ) -> Result<DispatchResponse, DispatchError> {
        self.dispatch(&self.auto_cache_event(event_type, payload)).await
    }

    /// The event `send_event_with_auto_cache` sends: cached iff a read, with
    /// the long TTL for slow-changing reads
    pub fn auto_cache_event(&self, event_type: &str, payload: &Value) -> WebhookEvent {
        let event = WebhookEvent::new(event_type, payload.clone());
        if self.is_write_operation(event_type, payload) {
            return event;
        }
        let ttl = if LONG_TTL_EVENTS.contains(&event_type) {
            self.long_ttl
        } else {
            self.default_ttl
        };
        event.cached(ttl.as_secs())
    }

    /// Drop the cached response for one exact event type and payload
    pub async fn forget_cached(&self, event_type: &str, payload: &Value) -> bool {
        self.cache.delete(&dispatch_cache_key(event_type, payload)).await
    }

    /// Drop cached responses for one event type, or all of them when empty
    pub async fn invalidate_cache(&self, event_type: &str) -> usize {
        let prefix = if event_type.is_empty() {
            DISPATCH_CACHE_NAMESPACE.to_string()
        } else {
            dispatch_cache_prefix(event_type)
        };

        let count = self.cache.delete_by_prefix(&prefix).await;
        self.events.trigger_event(
            events::CACHE_CLEARED,
            &json!({ "eventType": event_type, "prefix": prefix, "count": count }),
        );
        count
    }
}
