use axum::{middleware, routing::{get, post}, Router};
use std::sync::Arc;

use crate::handlers::{diagnostics, health_check, ready_check, set_code_result, submit_code};
use crate::routes::auth_middleware::{api_key_middleware, auth_middleware};
use crate::services::conference_service::ConferenceService;
use crate::websocket::{simple_peer_handler, yjs_handler};
use crate::ws::hub::HubHandle;

/// Shared state handed to every handler
pub struct AppState {
    pub hub: HubHandle,
    /// Absent when no database is configured
    pub conference: Option<Arc<ConferenceService>>,
}

/// Create the websocket signaling routes
pub fn create_ws_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/conference/:conference_id/yjs/", get(yjs_handler))
        .route("/conference/:conference_id/simple-peer/", get(simple_peer_handler))
        .with_state(state)
}

/// Create the code submission routes
pub fn create_conference_routes(state: Arc<AppState>) -> Router {
    let client_routes = Router::<Arc<AppState>>::new()
        .route("/conference-session/:session_id/code/", post(submit_code))
        .route_layer(middleware::from_fn(auth_middleware));

    let worker_routes = Router::<Arc<AppState>>::new()
        .route("/conference-session/:session_id/code/:code_id/", post(set_code_result))
        .route_layer(middleware::from_fn(api_key_middleware));

    client_routes.merge(worker_routes).with_state(state)
}

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn(api_key_middleware)) // Applies to all routes added above
        .with_state(state)
}

/// Create the unauthenticated probe routes
pub fn create_health_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}
