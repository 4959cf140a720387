use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use parley_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Health check that pings the store.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let store = match state.store.ping() {
        Ok(()) => HealthCheck {
            name: format!("store:{}", state.store.backend()),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => HealthCheck {
            name: format!("store:{}", state.store.backend()),
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
        },
    };
    let live = HealthCheck {
        name: "live".into(),
        status: HealthStatus::Healthy,
        message: Some(format!("{} active topics", state.live.active_topics())),
    };

    let response = HealthResponse::from_checks("parley-server", env!("CARGO_PKG_VERSION"), vec![store, live]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
