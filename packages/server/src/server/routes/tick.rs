//! The tick endpoint: one external pulse, one scheduler tick.
//!
//! The external trigger (a platform cron) POSTs here once a minute. Two
//! authentication forms are accepted: a configured trigger-platform
//! header, or a bearer token matching the shared secret. The endpoint is
//! safe at any cadence — concurrent pulses both tick, and the claim
//! protocol keeps execution single-owner. Jobs due between pulses wait
//! for the next pulse, so delivery can lag `next_run_at` by up to one
//! trigger interval.

use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use emonk_scheduler::TickBudget;

use crate::config::{Config, Environment};
use crate::server::app::AppState;

/// Optional body bounding the tick.
#[derive(Debug, Default, Deserialize)]
pub struct TickRequest {
    pub max_jobs: Option<usize>,
    pub max_duration_ms: Option<u64>,
}

pub async fn tick_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TickRequest>>,
) -> Response {
    let config = &state.deps.config;
    if !tick_authorized(config, &headers) {
        warn!("unauthenticated tick rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    // Global precondition: the store must be reachable.
    if let Err(e) = state.deps.store.ping().await {
        error!(error = %e, "store unreachable, refusing tick");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "store unreachable"})),
        )
            .into_response();
    }

    let mut budget = TickBudget::default();
    if let Some(Json(request)) = body {
        if let Some(max_jobs) = request.max_jobs {
            budget.max_jobs = max_jobs;
        }
        if let Some(ms) = request.max_duration_ms {
            budget.max_duration = std::time::Duration::from_millis(ms);
        }
    }

    match state.deps.scheduler.tick(budget).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(error = %e, "tick failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Header or bearer auth; open only in development with neither
/// configured (config validation forbids that in production).
fn tick_authorized(config: &Config, headers: &HeaderMap) -> bool {
    if let Some(header_name) = &config.tick_trigger_header {
        if headers.contains_key(header_name.as_str()) {
            return true;
        }
    }
    if let Some(secret) = &config.cron_secret {
        if bearer_token(headers) == Some(secret.as_str()) {
            return true;
        }
    }
    config.environment == Environment::Development
        && config.tick_trigger_header.is_none()
        && config.cron_secret.is_none()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
