//! Admin API: cache maintenance, settings and data wipe.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;
use whatsapp_bridge::services::{ConnectionStatus, KeyValueStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{bearer, spawn_app, VENDOR_ID};

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = spawn_app().await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/admin/cache/stats", &[], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/admin/cache/stats",
            &[bearer(&app.vendor_token())],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cache_stats_flush_and_cleanup() {
    let app = spawn_app().await;
    let admin = bearer(&app.admin_token());

    app.state.cache.set("live", &json!({"a": 1}), None).await;
    app.state
        .cache
        .set("stale", &json!({"b": 2}), Some(Duration::ZERO))
        .await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/admin/cache/stats", &[admin.clone()], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_entries"], 2);
    assert_eq!(body["data"]["expired_entries"], 1);
    assert_eq!(body["data"]["active_entries"], 1);

    let (status, body) = app
        .request(Method::POST, "/api/v1/admin/cache/cleanup", &[admin.clone()], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = app
        .request(Method::POST, "/api/v1/admin/cache/flush", &[admin.clone()], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert!(!app.state.cache.exists("live").await);
}

#[tokio::test]
async fn test_invalidate_event_cache_by_type_or_all() {
    let app = spawn_app().await;
    let admin = bearer(&app.admin_token());

    for event in ["get_status", "get_qr_code"] {
        Mock::given(method("POST"))
            .and(path(format!("/webhook/{}", event)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "open" })))
            .mount(&app.n8n)
            .await;
        app.state
            .dispatcher
            .send_event_with_auto_cache(event, &json!({ "vendor_id": VENDOR_ID }))
            .await
            .unwrap();
    }
    app.state.cache.set("unrelated", &1, None).await;

    let (status, body) = app
        .request(
            Method::DELETE,
            "/api/v1/admin/cache?event_type=get_status",
            &[admin.clone()],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = app
        .request(Method::DELETE, "/api/v1/admin/cache", &[admin], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert!(app.state.cache.exists("unrelated").await);
}

#[tokio::test]
async fn test_settings_update_masks_secrets() {
    let app = spawn_app().await;
    let admin = bearer(&app.admin_token());

    let (status, body) = app
        .request(
            Method::PUT,
            "/api/v1/admin/settings",
            &[admin.clone()],
            Some(json!({
                "n8n_base_url": "https://n8n.example.com/webhook/",
                "n8n_auth_token": "secret-token"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["n8n_base_url"], "https://n8n.example.com/webhook");
    assert_eq!(body["data"]["auth_token_configured"], true);
    assert!(!body.to_string().contains("secret-token"));

    let (status, _) = app
        .request(
            Method::PUT,
            "/api/v1/admin/settings",
            &[admin],
            Some(json!({ "n8n_base_url": "not a url" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_data_wipe_removes_all_owned_keys() {
    let app = spawn_app().await;
    let admin = bearer(&app.admin_token());

    app.state.cache.set("anything", &1, None).await;
    app.state
        .secrets
        .update_secure_option("n8n_auth_token", "tok")
        .await
        .unwrap();
    app.state
        .whatsapp
        .sessions()
        .set_status(VENDOR_ID, ConnectionStatus::Connected)
        .await;
    app.store.set("unrelated", "kept", None).await.unwrap();

    let (status, body) = app
        .request(Method::POST, "/api/v1/admin/data-wipe", &[admin], None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body["data"]["cache_keys"].as_u64().unwrap() >= 2);
    assert_eq!(body["data"]["option_keys"], 1);
    assert_eq!(body["data"]["vendor_keys"], 1);

    assert_eq!(app.store.get("unrelated").await.unwrap().as_deref(), Some("kept"));
    assert!(app.store.scan_prefix("vendor:").await.unwrap().is_empty());
    assert_eq!(
        app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await.connection_status,
        ConnectionStatus::Disconnected
    );
}
