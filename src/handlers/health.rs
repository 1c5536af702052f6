use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::HealthResponse;
use crate::routes::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Ready once the hub answers.
pub async fn ready_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    if state.hub.stats().await.is_none() {
        warn!("Readiness check failed: conference hub is not running");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable".to_string(),
                message: "Conference hub is not running".to_string(),
            }),
        );
    }

    let message = if state.conference.is_some() {
        "Signaling and code submission are ready"
    } else {
        "Signaling is ready, code submission is disabled"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: message.to_string(),
        }),
    )
}
