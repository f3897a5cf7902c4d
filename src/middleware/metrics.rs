use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// HTTP request counters and latency histogram
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.clone(),
        "status" => status.as_u16().to_string()
    )
    .record(duration.as_secs_f64());

    counter!(
        "http_responses_total",
        "method" => method.to_string(),
        "path" => path.clone(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    if status.is_server_error() {
        counter!(
            "http_errors_total",
            "method" => method.to_string(),
            "path" => path,
            "status" => status.as_u16().to_string()
        )
        .increment(1);
    }

    response
}

/// Outbound n8n call with its outcome (`success`, `raw`, `config_error`, ...)
pub fn track_webhook_dispatch(event_type: &str, outcome: &str, duration: Duration) {
    counter!(
        "webhook_dispatch_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!("webhook_dispatch_duration_seconds", "event_type" => event_type.to_string())
        .record(duration.as_secs_f64());
}

/// Dispatch answered from the cache without a network call
pub fn track_dispatch_cache_hit(event_type: &str) {
    counter!("webhook_cache_hits_total", "event_type" => event_type.to_string()).increment(1);
}

/// Rejected inbound webhook or vendor request
pub fn track_auth_failure(reason: &str) {
    counter!("auth_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Inbound status update processed for a vendor
pub fn track_status_update(status: &str) {
    counter!("vendor_status_updates_total", "status" => status.to_string()).increment(1);
}
