//! Webhook dispatcher against a mock n8n: caching, error mapping, signing.

mod common;

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use whatsapp_bridge::services::cache_service::RegistryRecord;
use whatsapp_bridge::services::event_bus::events;
use whatsapp_bridge::services::kv_store::get_json;
use whatsapp_bridge::services::{observer, DispatchError, DispatchResponse, EventBus, SettingsUpdate};
use whatsapp_bridge::utils::crypto::verify_hmac_sha256_hex;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{spawn_app, spawn_app_with, SHARED_SECRET};

const TTL: Duration = Duration::from_secs(300);

type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

/// Record every firing of `names` as `(event, data)` in order
fn record(bus: &EventBus, names: &[&'static str]) -> Recorded {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    for &name in names {
        let sink = recorded.clone();
        bus.add_observer(
            name,
            observer(move |data: &Value| {
                sink.lock().unwrap().push((name.to_string(), data.clone()));
                Ok(())
            }),
            10,
        );
    }
    recorded
}

#[tokio::test]
async fn test_cached_read_hits_network_once() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "open" })))
        .expect(1)
        .mount(&app.n8n)
        .await;

    let payload = json!({ "vendor_id": 42, "instance_name": "vendor_42_whatsapp_instance" });
    let first = app
        .state
        .dispatcher
        .send_event("get_status", &payload, true, TTL)
        .await
        .unwrap();
    let second = app
        .state
        .dispatcher
        .send_event("get_status", &payload, true, TTL)
        .await
        .unwrap();

    assert_eq!(first.as_json(), Some(&json!({ "status": "open" })));
    assert_eq!(first.into_value(), second.into_value());
    assert_eq!(app.state.cache.get_stats().await.active_entries, 1);
}

#[tokio::test]
async fn test_write_events_bypass_cache() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/send_message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sent": true })))
        .expect(2)
        .mount(&app.n8n)
        .await;

    let payload = json!({ "to": "+5491100000000" });
    for _ in 0..2 {
        app.state
            .dispatcher
            .send_event("send_message", &payload, true, TTL)
            .await
            .unwrap();
    }
    assert_eq!(app.state.cache.get_stats().await.total_entries, 0);
}

#[tokio::test]
async fn test_http_error_carries_status_and_body() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&app.n8n)
        .await;

    let err = app
        .state
        .dispatcher
        .send_event("get_status", &json!({}), true, TTL)
        .await
        .unwrap_err();

    match err {
        DispatchError::Response { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // failures are never cached
    assert_eq!(app.state.cache.get_stats().await.total_entries, 0);
}

#[tokio::test]
async fn test_non_json_body_is_returned_raw() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_qr_code"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Workflow was started"))
        .expect(2)
        .mount(&app.n8n)
        .await;

    for _ in 0..2 {
        let response = app
            .state
            .dispatcher
            .send_event("get_qr_code", &json!({}), true, TTL)
            .await
            .unwrap();
        assert!(matches!(response, DispatchResponse::Raw(ref text) if text == "Workflow was started"));
    }
}

#[tokio::test]
async fn test_missing_base_url_is_a_configuration_error() {
    let app = spawn_app_with(|config| config.n8n.base_url = None).await;

    let err = app
        .state
        .dispatcher
        .send_event("get_status", &json!({}), false, TTL)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Config(_)));
}

#[tokio::test]
async fn test_bearer_token_and_signature_headers() {
    let app = spawn_app().await;
    app.state
        .settings
        .update(SettingsUpdate {
            n8n_auth_token: Some("n8n-token".to_string()),
            ..SettingsUpdate::default()
        })
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/webhook/qr_generation"))
        .and(header("Authorization", "Bearer n8n-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&app.n8n)
        .await;

    app.state
        .dispatcher
        .send_event("qr_generation", &json!({ "vendorId": 42 }), false, TTL)
        .await
        .unwrap();

    let requests = app.n8n.received_requests().await.unwrap();
    let request = &requests[0];
    let timestamp = request.headers.get("X-WWEA-Timestamp").unwrap().to_str().unwrap();
    let signature = request.headers.get("X-WWEA-Signature").unwrap().to_str().unwrap();
    let body = String::from_utf8(request.body.clone()).unwrap();

    let signed = format!("{}.{}", timestamp, body);
    assert!(verify_hmac_sha256_hex(
        SHARED_SECRET.as_bytes(),
        signed.as_bytes(),
        signature
    ));
}

#[tokio::test]
async fn test_invalidation_is_scoped_to_one_event_type() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "open" })))
        .expect(2)
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/session_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(&app.n8n)
        .await;

    let dispatcher = &app.state.dispatcher;
    let payload = json!({ "vendorId": 42 });
    dispatcher.send_event("get_status", &payload, true, TTL).await.unwrap();
    dispatcher.send_event("session_status", &payload, true, TTL).await.unwrap();

    assert_eq!(dispatcher.invalidate_cache("get_status").await, 1);

    // refetched
    dispatcher.send_event("get_status", &payload, true, TTL).await.unwrap();
    // still cached
    dispatcher.send_event("session_status", &payload, true, TTL).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_n8n_is_a_transport_error() {
    // bind then drop to get a port nothing listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let app = spawn_app_with(move |config| {
        config.n8n.base_url = Some(format!("http://127.0.0.1:{}/webhook", port));
    })
    .await;
    let recorded = record(&app.state.events, &[events::REQUEST_ERROR]);

    let err = app
        .state
        .dispatcher
        .send_event("get_status", &json!({ "vendorId": 42 }), false, TTL)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Transport(_)), "got {:?}", err);
    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].1["eventType"], "get_status");
    assert_eq!(recorded[0].1["payload"], json!({ "vendorId": 42 }));
    assert!(!recorded[0].1["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_lifecycle_events_follow_each_outcome() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .and(path("/webhook/get_status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "open" })))
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_contacts"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&app.n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/get_profile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&app.n8n)
        .await;

    let recorded = record(
        &app.state.events,
        &[
            events::BEFORE_SEND,
            events::REQUEST_SUCCESS,
            events::HTTP_ERROR,
            events::INVALID_RESPONSE,
        ],
    );

    let dispatcher = &app.state.dispatcher;
    let payload = json!({ "vendorId": 42 });
    dispatcher.send_event("get_status", &payload, false, TTL).await.unwrap();
    dispatcher.send_event("get_contacts", &payload, false, TTL).await.unwrap_err();
    dispatcher.send_event("get_profile", &payload, false, TTL).await.unwrap();

    let recorded = recorded.lock().unwrap();
    let names: Vec<&str> = recorded.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            events::BEFORE_SEND,
            events::REQUEST_SUCCESS,
            events::BEFORE_SEND,
            events::HTTP_ERROR,
            events::BEFORE_SEND,
            events::INVALID_RESPONSE,
        ]
    );

    assert_eq!(
        recorded[0].1,
        json!({
            "eventType": "get_status",
            "payload": payload,
            "url": format!("{}/webhook/get_status", app.n8n.uri()),
        })
    );
    assert_eq!(recorded[1].1["response"], json!({ "status": "open" }));
    assert_eq!(recorded[3].1["eventType"], "get_contacts");
    assert_eq!(recorded[3].1["httpCode"], 503);
    assert_eq!(recorded[3].1["body"], "busy");
    assert_eq!(recorded[5].1["eventType"], "get_profile");
    assert_eq!(recorded[5].1["body"], "OK");
}

#[tokio::test]
async fn test_invalidating_without_event_type_clears_every_dispatch_entry() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&app.n8n)
        .await;

    let dispatcher = &app.state.dispatcher;
    let payload = json!({ "vendorId": 42 });
    dispatcher.send_event("get_status", &payload, true, TTL).await.unwrap();
    dispatcher.send_event("get_qr_code", &payload, true, TTL).await.unwrap();
    assert!(app.state.cache.set("unrelated", &json!(1), None).await);

    let recorded = record(&app.state.events, &[events::CACHE_CLEARED]);
    assert_eq!(dispatcher.invalidate_cache("").await, 2);

    assert!(app.state.cache.exists("unrelated").await);
    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].1["prefix"], "event_");
    assert_eq!(recorded[0].1["count"], 2);
}

#[tokio::test]
async fn test_auto_cache_uses_long_ttl_for_slow_reads() {
    let app = spawn_app().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&app.n8n)
        .await;

    let dispatcher = &app.state.dispatcher;
    let payload = json!({ "vendorId": 42 });
    for event in ["get_status", "get_instance_info", "get_qr_code", "get_contacts"] {
        dispatcher.send_event_with_auto_cache(event, &payload).await.unwrap();
    }
    dispatcher
        .send_event_with_auto_cache("send_message", &json!({ "to": "123", "message": "hi" }))
        .await
        .unwrap();

    let registry: BTreeMap<String, RegistryRecord> = get_json(&app.store, "wwea_cache_registry")
        .await
        .unwrap()
        .expect("registry written");
    let lifetime = |event: &str| {
        let prefix = format!("event_{}_", event);
        let records: Vec<&RegistryRecord> = registry
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, record)| record)
            .collect();
        assert_eq!(records.len(), 1, "one entry for {}", event);
        records[0].expires - records[0].created
    };

    assert_eq!(lifetime("get_status"), 900);
    assert_eq!(lifetime("get_instance_info"), 900);
    assert_eq!(lifetime("get_qr_code"), 900);
    assert_eq!(lifetime("get_contacts"), 300);
    assert!(!registry.keys().any(|key| key.starts_with("event_send_message_")));
}
