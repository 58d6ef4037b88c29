//! WebSocket handler — per-session broadcast relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers the peer in its room and enters a `select!` loop:
//! - Incoming binary frames → decode, stamp `from`/`session`, fan out to
//!   everyone else in the room
//! - Frames from room peers → forward to this client
//!
//! The relay never looks inside `data`. Authority, admission, and ordering
//! are the peers' business; the relay only guarantees that `from` names the
//! socket a frame actually arrived on.
//!
//! LIFECYCLE
//! =========
//! 1. `GET /ws?session=CODE&peer=ID[&tasks=N]` → validate, then upgrade
//! 2. Send `session:connected` with the room's welcome; broadcast `member:joined`
//! 3. Relay frames until the socket closes or a reconnect replaces it
//! 4. Part → broadcast `member:left` → evict the room if empty

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use frames::{FRAME_CODE, FRAME_MESSAGE, Frame, SYSCALL_CONNECTED, SYSCALL_ERROR};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::room::{self, JoinRequest};
use crate::state::{RelayError, RelayState};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<RelayState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let request = match parse_request(&params) {
        Ok(request) => request,
        Err(e) => return (status_for(&e), e.to_string()).into_response(),
    };
    if let Err(e) = room::check_room(&state, &request).await {
        info!(session = %request.session_code, peer = %request.peer_id, error = %e, "ws: upgrade refused");
        return (status_for(&e), e.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, request))
}

fn parse_request(params: &HashMap<String, String>) -> Result<JoinRequest, RelayError> {
    let session_code = params
        .get("session")
        .filter(|s| !s.is_empty())
        .ok_or(RelayError::MissingParam("session"))?;
    let peer_id = params
        .get("peer")
        .filter(|s| !s.is_empty())
        .ok_or(RelayError::MissingParam("peer"))?;
    let open = match params.get("tasks") {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| RelayError::InvalidTasks(raw.clone()))?,
        ),
        None => None,
    };
    Ok(JoinRequest { session_code: session_code.clone(), peer_id: peer_id.clone(), open })
}

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::MissingParam(_) | RelayError::InvalidTasks(_) => StatusCode::BAD_REQUEST,
        RelayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::SessionExists(_) => StatusCode::CONFLICT,
        RelayError::SessionFull(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState, request: JoinRequest) {
    // Per-connection channel for frames from room peers. The room holds the
    // only sender, so a reconnect that replaces it closes this queue.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_queue);

    // The room may have changed between the check and the upgrade.
    let (welcome, connection_id) = match room::join_room(&state, &request, client_tx).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(session = %request.session_code, peer = %request.peer_id, error = %e, "ws: join refused after upgrade");
            if send_frame(&mut socket, &Frame::error_from(&e)).await.is_err() {
                debug!(peer = %request.peer_id, "ws: socket closed before error frame");
            }
            return;
        }
    };
    let session_code = request.session_code.as_str();
    let peer_id = request.peer_id.as_str();

    let data = match serde_json::to_value(&welcome) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize welcome");
            leave(&state, session_code, peer_id, connection_id).await;
            return;
        }
    };
    let mut welcome_frame = Frame::new(SYSCALL_CONNECTED, data);
    welcome_frame.session = Some(session_code.to_owned());
    if send_frame(&mut socket, &welcome_frame).await.is_err() {
        leave(&state, session_code, peer_id, connection_id).await;
        return;
    }
    room::announce_joined(&state, session_code, peer_id).await;

    info!(session = %session_code, peer = %peer_id, %connection_id, members = welcome.members.len(), "ws: peer connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        if let Some(reply) = process_inbound_bytes(&state, session_code, peer_id, &bytes).await {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Text(_) => {
                        warn!(peer = %peer_id, "ws: text message ignored; frames are binary protobuf");
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = client_rx.recv() => {
                let Some(frame) = frame else {
                    info!(session = %session_code, peer = %peer_id, "ws: connection replaced by reconnect");
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    leave(&state, session_code, peer_id, connection_id).await;
    info!(session = %session_code, peer = %peer_id, %connection_id, "ws: peer disconnected");
}

async fn leave(state: &RelayState, session_code: &str, peer_id: &str, connection_id: Uuid) {
    if room::part_room(state, session_code, peer_id, connection_id).await {
        room::announce_left(state, session_code, peer_id).await;
    }
}

// =============================================================================
// FRAME RELAY
// =============================================================================

/// Decode, stamp, and fan out one inbound frame. Returns a frame for the
/// sender only when the input was unusable.
async fn process_inbound_bytes(state: &RelayState, session_code: &str, peer_id: &str, bytes: &[u8]) -> Option<Frame> {
    match frames::decode_frame(bytes) {
        Ok(frame) => {
            let frame = room::stamp(frame, session_code, peer_id);
            debug!(session = %session_code, peer = %peer_id, id = %frame.id, syscall = %frame.syscall, "ws: relay frame");
            room::broadcast(state, session_code, &frame, Some(peer_id)).await;
            None
        }
        Err(e) => {
            warn!(session = %session_code, peer = %peer_id, error = %e, "ws: invalid inbound frame");
            Some(Frame::error_from(&e))
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    if frame.syscall == SYSCALL_ERROR {
        let code = frame.data.get(FRAME_CODE).and_then(Value::as_str).unwrap_or("-");
        let message = frame.data.get(FRAME_MESSAGE).and_then(Value::as_str).unwrap_or("-");
        warn!(id = %frame.id, code, message, "ws: send error frame");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, "ws: send frame");
    }
    socket
        .send(Message::Binary(frames::encode_frame(frame).into()))
        .await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
