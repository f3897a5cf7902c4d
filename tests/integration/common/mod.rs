//! Shared setup for the router-level integration tests: an in-memory store,
//! a static vendor directory and a wiremock server standing in for n8n.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use whatsapp_bridge::auth::Role;
use whatsapp_bridge::config::Config;
use whatsapp_bridge::services::{MemoryStore, SharedStore, StaticVendorDirectory};
use whatsapp_bridge::{build_router, AppState};
use wiremock::MockServer;

pub const VENDOR_ID: i64 = 42;
pub const SHARED_SECRET: &str = "n8n-shared-secret";
pub const JWT_SECRET: &str = "integration-test-jwt-secret-0123456789";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub n8n: MockServer,
}

pub fn test_config(n8n_uri: &str) -> Config {
    let mut config = Config::default();
    config.environment = "test".to_string();
    config.jwt_secret = JWT_SECRET.to_string();
    config.n8n.base_url = Some(format!("{}/webhook", n8n_uri));
    config.n8n.shared_secret = Some(SHARED_SECRET.to_string());
    config.security.encryption_secret = Some("integration-master-secret".to_string());
    config.vendor_ids = vec![VENDOR_ID];
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like `spawn_app`, with a hook to adjust the configuration first
pub async fn spawn_app_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    let n8n = MockServer::start().await;
    let mut config = test_config(&n8n.uri());
    adjust(&mut config);
    let store = MemoryStore::new();
    let shared: SharedStore = Arc::new(store.clone());
    let vendors = Arc::new(StaticVendorDirectory::new(config.vendor_ids.clone()));
    let state = AppState::build(config, shared, vendors, None).expect("state builds");
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        store,
        n8n,
    }
}

impl TestApp {
    pub fn token(&self, account_id: i64, role: Role) -> String {
        self.state
            .jwt_service
            .generate_token(account_id, role, chrono::Duration::hours(1))
            .expect("token generation")
    }

    pub fn vendor_token(&self) -> String {
        self.token(VENDOR_ID, Role::Vendor)
    }

    pub fn admin_token(&self) -> String {
        self.token(1, Role::Admin)
    }

    /// Obtain a CSRF nonce through the API, as the vendor dashboard does
    pub async fn vendor_nonce(&self) -> String {
        let (status, body) = self
            .request(Method::GET, "/api/v1/vendor/nonce", &[bearer(&self.vendor_token())], None)
            .await;
        assert_eq!(status, StatusCode::OK, "nonce request failed: {}", body);
        body["data"]["token"]
            .as_str()
            .expect("nonce token in response")
            .to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(String, String)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let request = builder
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .expect("request builds");

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router handles request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }
}

pub fn bearer(token: &str) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {}", token))
}

pub fn nonce(value: &str) -> (String, String) {
    ("X-WWEA-Nonce".to_string(), value.to_string())
}

pub fn shared_secret(value: &str) -> (String, String) {
    ("X-WWEA-SECRET".to_string(), value.to_string())
}
