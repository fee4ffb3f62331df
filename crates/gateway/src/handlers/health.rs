//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;
use coursedesk_common::errors::Result;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub backend: CheckResult,
    pub database: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn from_result(result: Result<()>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "up".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => Self {
                status: "down".to_string(),
                latency_ms: None,
                error: Some(format!("{:?}", e.code())),
            },
        }
    }

    fn not_configured() -> Self {
        Self {
            status: "not_configured".to_string(),
            latency_ms: None,
            error: None,
        }
    }

    fn is_down(&self) -> bool {
        self.status == "down"
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: coursedesk_common::VERSION,
    })
}

/// Readiness probe - checks the backend and, when configured, the store
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();
    let backend = CheckResult::from_result(state.backend.ping().await, start);

    let database = match &state.store {
        Some(store) => {
            let start = Instant::now();
            CheckResult::from_result(store.ping().await, start)
        }
        None => CheckResult::not_configured(),
    };

    let ready = !backend.is_down() && !database.is_down();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks { backend, database },
        }),
    )
}
