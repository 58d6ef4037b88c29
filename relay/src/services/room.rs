//! Room service — open/join/part and fan-out for one session code.
//!
//! DESIGN
//! ======
//! The host opens a room by connecting with a task count; guests attach to
//! an existing room. A room lives only while someone is connected: the last
//! part evicts it, so a session code is free again once everyone left.
//!
//! A peer id holds at most one connection per room. A reconnect replaces the
//! previous sender, which closes the older socket's outbound queue; its late
//! part is ignored because the connection id no longer matches.
//!
//! ERROR HANDLING
//! ==============
//! Broadcast is best-effort `try_send`. A slow client loses frames rather
//! than stalling the room; the session protocol heals via heartbeats and
//! catch-up requests.

use frames::{Frame, SYSCALL_MEMBER_JOINED, SYSCALL_MEMBER_LEFT, Welcome};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::{Client, RelayError, RelayState, Room};

// =============================================================================
// TYPES
// =============================================================================

/// Who is connecting and, for the host, what it opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub session_code: String,
    pub peer_id: String,
    /// `Some(task_count)` when the caller opens the session as host.
    pub open: Option<usize>,
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Check a join without registering it, so the HTTP upgrade can be refused.
///
/// # Errors
///
/// Same conditions as [`join_room`].
pub async fn check_room(state: &RelayState, request: &JoinRequest) -> Result<(), RelayError> {
    let rooms = state.rooms.read().await;
    match rooms.get(&request.session_code) {
        Some(room) => admit(state, room, request),
        None if request.open.is_some() => Ok(()),
        None => Err(RelayError::SessionNotFound(request.session_code.clone())),
    }
}

/// Register a connection. Opens the room when the caller is its host.
/// Returns the welcome payload and the new connection id.
///
/// # Errors
///
/// Returns `SessionNotFound` when a guest names a room nobody opened,
/// `SessionExists` when a second host claims a live code, and `SessionFull`
/// when the room is at `max_peers`.
pub async fn join_room(
    state: &RelayState,
    request: &JoinRequest,
    tx: mpsc::Sender<Frame>,
) -> Result<(Welcome, Uuid), RelayError> {
    let mut rooms = state.rooms.write().await;
    if !rooms.contains_key(&request.session_code) {
        let Some(task_count) = request.open else {
            return Err(RelayError::SessionNotFound(request.session_code.clone()));
        };
        rooms.insert(request.session_code.clone(), Room::new(request.peer_id.clone(), task_count));
        info!(session = %request.session_code, host = %request.peer_id, task_count, "room opened");
    }
    let Some(room) = rooms.get_mut(&request.session_code) else {
        return Err(RelayError::SessionNotFound(request.session_code.clone()));
    };
    admit(state, room, request)?;

    let mut members: Vec<String> = room
        .clients
        .keys()
        .filter(|p| **p != request.peer_id)
        .cloned()
        .collect();
    members.sort();

    let connection_id = Uuid::new_v4();
    if room
        .clients
        .insert(request.peer_id.clone(), Client { connection_id, tx })
        .is_some()
    {
        info!(session = %request.session_code, peer = %request.peer_id, "reconnect replaced previous connection");
    }
    info!(session = %request.session_code, peer = %request.peer_id, clients = room.clients.len(), "peer joined room");

    let welcome = Welcome {
        session_code: request.session_code.clone(),
        host_peer_id: room.host_peer_id.clone(),
        task_count: room.task_count,
        members,
    };
    Ok((welcome, connection_id))
}

fn admit(state: &RelayState, room: &Room, request: &JoinRequest) -> Result<(), RelayError> {
    if let Some(task_count) = request.open {
        if room.host_peer_id != request.peer_id || room.task_count != task_count {
            return Err(RelayError::SessionExists(request.session_code.clone()));
        }
    }
    if !room.clients.contains_key(&request.peer_id) && room.clients.len() >= state.config.max_peers {
        return Err(RelayError::SessionFull(request.session_code.clone()));
    }
    Ok(())
}

/// Leave a room. Returns `false` when a newer connection already replaced
/// this one. Evicts the room when its last client leaves.
pub async fn part_room(state: &RelayState, session_code: &str, peer_id: &str, connection_id: Uuid) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(session_code) else {
        return false;
    };
    if room
        .clients
        .get(peer_id)
        .is_none_or(|c| c.connection_id != connection_id)
    {
        return false;
    }

    room.clients.remove(peer_id);
    info!(session = %session_code, peer = %peer_id, remaining = room.clients.len(), "peer left room");
    if room.clients.is_empty() {
        rooms.remove(session_code);
        info!(session = %session_code, "evicted empty room");
    }
    true
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Send a frame to every client in the room, optionally excluding one peer.
pub async fn broadcast(state: &RelayState, session_code: &str, frame: &Frame, exclude: Option<&str>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(session_code) else {
        return;
    };
    for (peer_id, client) in &room.clients {
        if exclude == Some(peer_id.as_str()) {
            continue;
        }
        if client.tx.try_send(frame.clone()).is_err() {
            debug!(session = %session_code, peer = %peer_id, syscall = %frame.syscall, "client queue full or closed; frame dropped");
        }
    }
}

/// Overwrite the routing fields the sender is not trusted to set.
#[must_use]
pub fn stamp(mut frame: Frame, session_code: &str, peer_id: &str) -> Frame {
    frame.from = Some(peer_id.to_owned());
    frame.session = Some(session_code.to_owned());
    frame
}

/// Membership notice for `member:joined` / `member:left`, shaped as `MemberNotice`.
#[must_use]
pub fn member_frame(syscall: &'static str, session_code: &str, peer_id: &str) -> Frame {
    let mut frame = Frame::new(syscall, serde_json::json!({ "peer_id": peer_id }));
    frame.session = Some(session_code.to_owned());
    frame
}

/// Tell the rest of the room a peer arrived.
pub async fn announce_joined(state: &RelayState, session_code: &str, peer_id: &str) {
    let frame = member_frame(SYSCALL_MEMBER_JOINED, session_code, peer_id);
    broadcast(state, session_code, &frame, Some(peer_id)).await;
}

/// Tell the rest of the room a peer's connection closed.
pub async fn announce_left(state: &RelayState, session_code: &str, peer_id: &str) {
    let frame = member_frame(SYSCALL_MEMBER_LEFT, session_code, peer_id);
    broadcast(state, session_code, &frame, Some(peer_id)).await;
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
