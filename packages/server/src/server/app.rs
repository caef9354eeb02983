//! Application setup and server configuration.

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::SharedDeps;
use crate::server::routes::{health_handler, tick_handler, webhook_handler};

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub deps: SharedDeps,
}

/// Assemble the HTTP surface over wired dependencies.
pub fn build_app(deps: SharedDeps) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/cron/tick", post(tick_handler))
        .route("/webhook", post(webhook_handler))
        // Ticks bound themselves to 60 s; give the layer headroom.
        .layer(TimeoutLayer::new(Duration::from_secs(70)))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { deps })
}
