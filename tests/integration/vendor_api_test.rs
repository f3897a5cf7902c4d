//! Vendor WhatsApp API: session auth, CSRF nonce and the n8n-backed flows.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use whatsapp_bridge::auth::Role;
use whatsapp_bridge::services::event_bus::events;
use whatsapp_bridge::services::{observer, ConnectionStatus};
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{bearer, nonce, shared_secret, spawn_app, spawn_app_with, SHARED_SECRET, VENDOR_ID};

#[tokio::test]
async fn test_qr_request_stores_returned_qr() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/qr_generation"))
        .and(body_json(json!({
            "eventType": "qr_generation",
            "sessionName": "vendor_42",
            "vendorId": 42
        })))
        .and(header_exists("X-WWEA-Signature"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "data": { "qrCodeUrl": "https://x/qr.png" } })),
        )
        .expect(1)
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/qr", &[bearer(&token), nonce(&csrf)], None)
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["qr_code"], "https://x/qr.png");

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::PendingQrScan);
    assert_eq!(settings.qr_code_data, "https://x/qr.png");
}

#[tokio::test]
async fn test_missing_or_forged_nonce_is_rejected_before_dispatch() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();

    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/qr", &[bearer(&token)], None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "AUTH_1005");

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/vendor/qr",
            &[bearer(&token), nonce("forged")],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_session_is_required() {
    let app = spawn_app().await;
    let csrf = app.vendor_nonce().await;

    // no bearer token
    let (status, _) = app
        .request(Method::GET, "/api/v1/vendor/settings", &[nonce(&csrf)], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // admin session on a vendor route
    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/vendor/settings",
            &[bearer(&app.admin_token()), nonce(&csrf)],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // vendor role claim for an account the directory does not know
    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/vendor/nonce",
            &[bearer(&app.token(7, Role::Vendor))],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // garbage token
    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/nonce", &[bearer("not-a-jwt")], None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_1003");
}

#[tokio::test]
async fn test_invalid_phone_never_reaches_n8n() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/message_send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(0)
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/vendor/enviar-mensaje",
            &[bearer(&token), nonce(&csrf)],
            Some(json!({ "to": "12ab", "message": "hola" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3004");
    assert_eq!(body["error"]["field"], "to");
}

#[tokio::test]
async fn test_send_message_dispatches_payload() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/message_send"))
        .and(body_json(json!({
            "eventType": "message_send",
            "sessionName": "vendor_42",
            "to": "+5491100000000",
            "message": "hola",
            "vendorId": 42
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "queued": true })))
        .expect(1)
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/vendor/enviar-mensaje",
            &[bearer(&token), nonce(&csrf)],
            Some(json!({ "to": "+5491100000000", "message": "hola" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["queued"], true);
}

#[tokio::test]
async fn test_n8n_failure_surfaces_as_bad_gateway() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/session_status"))
        .respond_with(ResponseTemplate::new(500).set_body_string("workflow crashed"))
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/estado-sesion",
            &[bearer(&token), nonce(&csrf)],
            None,
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "EXT_8002");
}

#[tokio::test]
async fn test_status_check_keeps_qr_only_while_scanning() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/session_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "QRCODE", "qrCodeUrl": "https://x/qr2.png" }
        })))
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/estado-sesion",
            &[bearer(&token), nonce(&csrf)],
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "qrcode");

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Qrcode);
    assert_eq!(settings.qr_code_data, "https://x/qr2.png");
}

#[tokio::test]
async fn test_whatsapp_number_is_sanitized_and_saved() {
    let app = spawn_app().await;
    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/vendor/whatsapp-number",
            &[bearer(&token), nonce(&csrf)],
            Some(json!({ "whatsapp_number": "+54 9 11 0000-0000" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["whatsapp_number"], "+5491100000000");

    // the nonce stays valid for the rest of the session
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/settings",
            &[bearer(&token), nonce(&csrf)],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["whatsapp_number"], "+5491100000000");
    assert_eq!(body["data"]["instance_name"], "vendor_42_whatsapp_instance");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/vendor/whatsapp-number",
            &[bearer(&token), nonce(&csrf)],
            Some(json!({ "whatsapp_number": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3002");
}

#[tokio::test]
async fn test_nonce_only_authenticates_the_issuing_vendor() {
    let app = spawn_app_with(|config| config.vendor_ids = vec![7, VENDOR_ID]).await;

    let other_token = app.token(7, Role::Vendor);
    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/nonce", &[bearer(&other_token)], None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let other_nonce = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/settings",
            &[bearer(&app.vendor_token()), nonce(&other_nonce)],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "AUTH_1005");

    let own_nonce = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/settings",
            &[bearer(&app.vendor_token()), nonce(&own_nonce)],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["vendor_id"], VENDOR_ID);
}

#[tokio::test]
async fn test_whatsapp_data_combines_qr_and_status() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_qr_code"))
        .and(body_json(json!({
            "vendor_id": 42,
            "instance_name": "vendor_42_whatsapp_instance"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "qr_code": "https://x/qr.png" })))
        .expect(1)
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "qrcode" })))
        .expect(1)
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    for _ in 0..2 {
        let (status, body) = app
            .request(
                Method::GET,
                "/api/v1/vendor/whatsapp-data",
                &[bearer(&token), nonce(&csrf)],
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["qr_code"], "https://x/qr.png");
        assert_eq!(body["data"]["status"], "qrcode");
        assert!(body["data"]["error"].is_null());
    }

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Qrcode);
    assert_eq!(settings.qr_code_data, "https://x/qr.png");
}

#[tokio::test]
async fn test_whatsapp_data_reports_partial_failure() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_qr_code"))
        .respond_with(ResponseTemplate::new(500).set_body_string("instance offline"))
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "open",
            "connection_info": { "phone": "+5491100000000" }
        })))
        .mount(&app.n8n)
        .await;

    let token = app.vendor_token();
    let csrf = app.vendor_nonce().await;
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/vendor/whatsapp-data",
            &[bearer(&token), nonce(&csrf)],
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "connected");
    assert_eq!(body["data"]["connection_info"]["phone"], "+5491100000000");
    let error = body["data"]["error"].as_str().unwrap();
    assert!(error.contains("Failed to get QR code"), "{}", error);

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_pushed_status_is_not_overwritten_by_cached_reads() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_qr_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "qr_code": "https://x/qr.png" })))
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "qrcode" })))
        .up_to_n_times(1)
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "open" })))
        .mount(&app.n8n)
        .await;

    let disconnected = Arc::new(AtomicUsize::new(0));
    {
        let disconnected = disconnected.clone();
        app.state.events.add_observer(
            events::SESSION_DISCONNECTED,
            observer(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            10,
        );
    }

    let vendor_headers = [bearer(&app.vendor_token()), nonce(&app.vendor_nonce().await)];

    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/whatsapp-data", &vendor_headers, None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "qrcode");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/status-update",
            &[shared_secret(SHARED_SECRET)],
            Some(json!({ "instance_name": "vendor_42_whatsapp_instance", "status": "connected" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = app
        .request(Method::GET, "/api/v1/vendor/whatsapp-data", &vendor_headers, None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "connected");
    assert_eq!(body["data"]["qr_code"], "");

    let settings = app.state.whatsapp.sessions().get_vendor_settings(VENDOR_ID).await;
    assert_eq!(settings.connection_status, ConnectionStatus::Connected);
    assert_eq!(settings.qr_code_data, "");
    assert_eq!(disconnected.load(Ordering::SeqCst), 0);

    let status_calls = app
        .n8n
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/webhook/get_status")
        .count();
    assert_eq!(status_calls, 2);
}
