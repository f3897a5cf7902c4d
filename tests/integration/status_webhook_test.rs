//! Inbound `/api/v1/status-update` webhook from n8n.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use whatsapp_bridge::services::event_bus::events;
use whatsapp_bridge::services::{observer, ConnectionStatus};

use common::{shared_secret, spawn_app, spawn_app_with, SHARED_SECRET, VENDOR_ID};

const ROUTE: &str = "/api/v1/status-update";

fn connected_body() -> serde_json::Value {
    json!({
        "instance_name": "vendor_42_whatsapp_instance",
        "status": "connected",
        "connection_info": { "phone": "+5491100000000" }
    })
}

#[tokio::test]
async fn test_rejects_missing_or_wrong_secret() {
    let app = spawn_app().await;

    let (status, _) = app
        .request(Method::POST, ROUTE, &[], Some(connected_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret("not-the-secret")],
            Some(connected_body()),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_1001");

    // nothing was written
    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_rejects_everything_when_secret_unconfigured() {
    let app = spawn_app_with(|config| config.n8n.shared_secret = None).await;

    let (status, _) = app
        .request(Method::POST, ROUTE, &[shared_secret("")], Some(connected_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(connected_body()),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_instance_name_is_bad_request() {
    let app = spawn_app().await;

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "someone_else", "status": "connected" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3005");
}

#[tokio::test]
async fn test_unknown_vendor_is_not_found() {
    let app = spawn_app().await;

    let (status, _) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "vendor_7_whatsapp_instance", "status": "connected" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connected_update_is_stored_and_clears_qr() {
    let app = spawn_app().await;
    let sessions = app.state.whatsapp.sessions();
    sessions.set_qr_code(VENDOR_ID, "https://x/qr.png").await;

    let connected = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    {
        let connected = connected.clone();
        app.state.events.add_observer(
            events::SESSION_CONNECTED,
            observer(move |_| {
                connected.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            10,
        );
        let processed = processed.clone();
        app.state.events.add_observer(
            events::WEBHOOK_PROCESSED,
            observer(move |_| {
                processed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            10,
        );
    }

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(connected_body()),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["vendor_id"], VENDOR_ID);
    assert_eq!(body["new_status"], "connected");

    let settings = sessions.get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Connected);
    assert_eq!(settings.qr_code_data, "");
    assert_eq!(settings.connection_info["phone"], "+5491100000000");
    assert!(settings.last_update_timestamp > 0);

    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(processed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gateway_status_synonyms_are_normalized() {
    let app = spawn_app().await;

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "vendor_42_whatsapp_instance", "status": "close" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_status"], "disconnected");
}

#[tokio::test]
async fn test_qr_scanned_is_kept_and_reported_status_echoed() {
    let app = spawn_app().await;

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "vendor_42_whatsapp_instance", "status": "qr_scanned" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["new_status"], "qr_scanned");
    assert_eq!(body["reported_status"], "qr_scanned");

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::QrScanned);

    let (status, body) = app
        .request(
            Method::POST,
            ROUTE,
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "vendor_42_whatsapp_instance", "status": "Rebooting" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["new_status"], "unknown");
    assert_eq!(body["reported_status"], "Rebooting");
}
