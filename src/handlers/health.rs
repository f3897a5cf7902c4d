use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub environment: String,
    pub dependencies: Vec<ServiceHealth>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceHealth {
    pub name: String,
    pub status: String,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl HealthStatus {
    pub fn new(environment: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.to_string(),
            dependencies: Vec::new(),
        }
    }

    pub fn add_dependency_check(
        &mut self,
        name: &str,
        is_healthy: bool,
        response_time: Option<u64>,
        error: Option<String>,
    ) {
        self.dependencies.push(ServiceHealth {
            name: name.to_string(),
            status: if is_healthy {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            response_time_ms: response_time,
            error_message: error,
        });

        // Any unhealthy dependency degrades the overall status
        if !is_healthy {
            self.status = "degraded".to_string();
        }
    }
}

/// Health check including the storage backend
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health", body = HealthStatus)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let mut health = HealthStatus::new(&state.config.environment);

    let started = Instant::now();
    let ping = state.store.ping().await;
    let elapsed = started.elapsed().as_millis() as u64;
    health.add_dependency_check(
        state.store.backend_name(),
        ping.is_ok(),
        Some(elapsed),
        ping.err().map(|e| e.to_string()),
    );

    health.add_dependency_check(
        "n8n_configuration",
        state.settings.base_url().await.is_some(),
        None,
        None,
    );

    Json(health)
}
