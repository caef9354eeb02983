use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    checks: Checks,
}

#[derive(Serialize)]
pub struct Checks {
    store: CheckResult,
    registry: CheckResult,
}

#[derive(Serialize)]
struct CheckResult {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckResult {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error),
        }
    }
}

/// Health check endpoint
///
/// Checks:
/// - Job store reachability
/// - Handler registry is loaded
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable
/// otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.deps.store.ping(),
    )
    .await
    {
        Ok(Ok(())) => CheckResult::ok(),
        Ok(Err(e)) => CheckResult::error(format!("ping failed: {}", e)),
        Err(_) => CheckResult::error("ping timeout (>5s)".to_string()),
    };

    let registry = if state.deps.registry.is_empty() {
        CheckResult::error("no handlers registered".to_string())
    } else {
        CheckResult::ok()
    };

    let healthy = store.status == "ok" && registry.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            checks: Checks { store, registry },
        }),
    )
}
