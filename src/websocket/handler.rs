use std::sync::Arc;
use axum::{
    extract::{Path, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::db::dbconference;
use crate::models::WebsocketError;
use crate::routes::AppState;
use crate::ws::client::{WebSocketClient, MAX_MESSAGE_SIZE};
use crate::ws::hub::RoomKey;
use crate::ws::sessionctx;

/// Signaling channel used by the shared editor
pub const YJS: &str = "yjs";
/// Signaling channel used by the peer-to-peer media connection
pub const SIMPLE_PEER: &str = "simple-peer";

/// WebSocket handler for the editor channel
pub async fn yjs_handler(
    Path(conference_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    connect(YJS, conference_id, &headers, ws, state)
}

/// WebSocket handler for the peer connection channel
pub async fn simple_peer_handler(
    Path(conference_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    connect(SIMPLE_PEER, conference_id, &headers, ws, state)
}

/// An absent Origin header (non-browser client) or an empty allow-list passes
pub fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).map(|o| o.to_str()) {
        None => true,
        Some(Ok(origin)) => allowed.iter().any(|a| a == "*" || a == origin),
        Some(Err(_)) => false,
    }
}

fn connect(
    from: &str,
    conference_id: String,
    headers: &HeaderMap,
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
) -> Response {
    if !origin_allowed(headers, &config::get_config().allowed_origins()) {
        warn!("Rejected {} connection for conference {} from disallowed origin", from, conference_id);
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    info!("New {} connection attempt for conference {}", from, conference_id);
    let room = RoomKey::new(from, conference_id);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, room, state))
}

/// Check that the conference exists before joining its room
async fn validate_conference(conference_id: &str) -> Result<(), String> {
    let conference_uuid = Uuid::parse_str(conference_id)
        .map_err(|_| format!("Conference ID {} is not valid", conference_id))?;

    if dbconference::get_db().is_none() {
        debug!("No database configured, skipping session lookup for {}", conference_id);
        return Ok(());
    }

    match sessionctx::get_or_fetch_session_ctx(conference_uuid).await? {
        Some(ctx) => {
            debug!("Conference {} belongs to session {}", conference_id, ctx.session_id);
            Ok(())
        }
        None => Err(format!("No session found for conference {}", conference_id)),
    }
}

/// Tell the client why it was turned away, then close
async fn reject(mut socket: WebSocket, reason: String) {
    let body = match serde_json::to_string(&WebsocketError { error: reason }) {
        Ok(body) => body,
        Err(_) => return,
    };
    if socket.send(Message::Text(body)).await.is_ok() {
        let _ = socket.send(Message::Close(None)).await;
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, room: RoomKey, state: Arc<AppState>) {
    if let Err(reason) = validate_conference(&room.conference_id).await {
        warn!("Rejecting connection to {}: {}", room, reason);
        reject(socket, reason).await;
        return;
    }

    let client = WebSocketClient::new(room, state.hub.clone());
    info!("WebSocket connection established for room {} as peer {}", client.room(), client.id());
    client.serve(socket).await;
    info!("WebSocket connection terminated");
}
