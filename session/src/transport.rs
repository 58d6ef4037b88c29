//! Transport seam — how a session peer reaches its broadcast channel.
//!
//! ARCHITECTURE
//! ============
//! The core needs exactly three things from a transport: subscribe to one
//! channel per session, broadcast a frame to everyone else on it, and a
//! membership feed (who subscribed, who went away). `Transport::connect`
//! returns a `Link` with an outbound frame sender and an inbound event
//! receiver; the runtime owns both.
//!
//! `MemoryHub` is the in-process implementation used by tests and local
//! play. It mirrors the relay: the host opens a session, guests join an
//! existing one, every frame goes through the protobuf codec, `from` and
//! `session` are stamped by the hub, and fan-out excludes the sender.
//!
//! ERROR HANDLING
//! ==============
//! Broadcast is best-effort. A full receiver queue drops the frame for that
//! receiver only; the protocol heals through heartbeats and catch-up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use frames::{ErrorCode, Frame, MemberNotice, SYSCALL_MEMBER_JOINED, SYSCALL_MEMBER_LEFT, Welcome};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{PeerId, Session};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} is already open under another host")]
    SessionExists(String),
    #[error("session {0} is full")]
    SessionFull(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport closed")]
    Closed,
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "E_SESSION_NOT_FOUND",
            Self::SessionExists(_) => "E_SESSION_EXISTS",
            Self::SessionFull(_) => "E_SESSION_FULL",
            Self::Connect(_) => "E_CONNECT",
            Self::Closed => "E_TRANSPORT_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub session_code: String,
    pub peer_id: PeerId,
    /// `Some` when the caller is the host opening the session.
    pub open: Option<Session>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Frame),
    MemberJoined(PeerId),
    MemberLeft(PeerId),
    Closed,
}

impl TransportEvent {
    /// Sort an inbound frame into a membership change or an application frame.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        let joined = match frame.syscall.as_str() {
            SYSCALL_MEMBER_JOINED => true,
            SYSCALL_MEMBER_LEFT => false,
            _ => return Self::Frame(frame),
        };
        match serde_json::from_value::<MemberNotice>(frame.data.clone()) {
            Ok(notice) if joined => Self::MemberJoined(PeerId::new(notice.peer_id)),
            Ok(notice) => Self::MemberLeft(PeerId::new(notice.peer_id)),
            Err(e) => {
                debug!(error = %e, syscall = %frame.syscall, "transport: malformed member notice");
                Self::Frame(frame)
            }
        }
    }
}

/// A live subscription to one session channel.
pub struct Link {
    pub session: Session,
    /// Peers already on the channel when we connected.
    pub members: Vec<PeerId>,
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to a session channel.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when joining a session nobody opened, and
    /// transport-specific connect failures.
    async fn connect(&self, request: ConnectRequest) -> Result<Link, TransportError>;
}

/// Session facts from the relay's welcome frame.
#[must_use]
pub fn session_from_welcome(welcome: &Welcome) -> Session {
    Session::new(welcome.session_code.clone(), PeerId::new(welcome.host_peer_id.clone()), welcome.task_count)
}

// =============================================================================
// MEMORY HUB
// =============================================================================

struct Client {
    connection_id: Uuid,
    tx: mpsc::Sender<TransportEvent>,
}

struct Room {
    session: Session,
    clients: HashMap<PeerId, Client>,
}

/// In-process broadcast hub.
#[derive(Clone)]
pub struct MemoryHub {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    queue_capacity: usize,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    #[must_use]
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), queue_capacity: queue_capacity.max(1) }
    }

    /// Peers currently subscribed to a session, sorted.
    pub async fn members(&self, session_code: &str) -> Vec<PeerId> {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(session_code) else {
            return Vec::new();
        };
        let mut members: Vec<PeerId> = room.clients.keys().cloned().collect();
        members.sort();
        members
    }

    /// Sever a peer's connection as if its network dropped.
    pub async fn disconnect(&self, session_code: &str, peer_id: &PeerId) {
        let connection_id = {
            let rooms = self.rooms.read().await;
            rooms
                .get(session_code)
                .and_then(|r| r.clients.get(peer_id))
                .map(|c| c.connection_id)
        };
        if let Some(connection_id) = connection_id {
            self.leave(session_code, peer_id, connection_id).await;
        }
    }

    async fn route(&self, session_code: &str, sender: &PeerId, connection_id: Uuid, frame: Frame) {
        if !self.is_current(session_code, sender, connection_id).await {
            debug!(%sender, "hub: dropping frame from a closed connection");
            return;
        }
        // Same bytes a relay would carry.
        let mut frame = match frames::decode_frame(&frames::encode_frame(&frame)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, %sender, "hub: dropping undecodable frame");
                return;
            }
        };
        frame.from = Some(sender.to_string());
        frame.session = Some(session_code.to_owned());
        self.broadcast(session_code, &TransportEvent::Frame(frame), Some(sender)).await;
    }

    async fn is_current(&self, session_code: &str, peer_id: &PeerId, connection_id: Uuid) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(session_code)
            .and_then(|r| r.clients.get(peer_id))
            .is_some_and(|c| c.connection_id == connection_id)
    }

    async fn broadcast(&self, session_code: &str, event: &TransportEvent, exclude: Option<&PeerId>) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(session_code) else {
            return;
        };
        for (peer_id, client) in &room.clients {
            if exclude == Some(peer_id) {
                continue;
            }
            if client.tx.try_send(event.clone()).is_err() {
                debug!(%peer_id, "hub: receiver queue full or closed; frame dropped");
            }
        }
    }

    async fn leave(&self, session_code: &str, peer_id: &PeerId, connection_id: Uuid) {
        {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(session_code) else {
                return;
            };
            // A reconnect already replaced this connection.
            if room.clients.get(peer_id).is_none_or(|c| c.connection_id != connection_id) {
                return;
            }
            if let Some(client) = room.clients.remove(peer_id) {
                if client.tx.try_send(TransportEvent::Closed).is_err() {
                    debug!(%peer_id, "hub: closed peer was not listening");
                }
            }
            info!(session = %session_code, %peer_id, remaining = room.clients.len(), "hub: peer left");
            if room.clients.is_empty() {
                rooms.remove(session_code);
                info!(session = %session_code, "hub: evicted empty session");
                return;
            }
        }
        self.broadcast(session_code, &TransportEvent::MemberLeft(peer_id.clone()), None)
            .await;
    }
}

#[async_trait]
impl Transport for MemoryHub {
    async fn connect(&self, request: ConnectRequest) -> Result<Link, TransportError> {
        let ConnectRequest { session_code, peer_id, open } = request;
        let (in_tx, inbound) = mpsc::channel(self.queue_capacity);
        let connection_id = Uuid::new_v4();

        let (session, members) = {
            let mut rooms = self.rooms.write().await;
            if !rooms.contains_key(&session_code) {
                let Some(open) = open.clone() else {
                    return Err(TransportError::SessionNotFound(session_code));
                };
                if open.session_code != session_code {
                    return Err(TransportError::Connect(format!(
                        "session code {} does not match {}",
                        open.session_code, session_code
                    )));
                }
                rooms.insert(session_code.clone(), Room { session: open, clients: HashMap::new() });
            }
            let Some(room) = rooms.get_mut(&session_code) else {
                return Err(TransportError::SessionNotFound(session_code));
            };
            if open.as_ref().is_some_and(|open| &room.session != open) {
                return Err(TransportError::SessionExists(session_code));
            }

            let mut members: Vec<PeerId> = room.clients.keys().filter(|p| *p != &peer_id).cloned().collect();
            members.sort();
            room.clients
                .insert(peer_id.clone(), Client { connection_id, tx: in_tx });
            info!(session = %session_code, %peer_id, clients = room.clients.len(), "hub: peer connected");
            (room.session.clone(), members)
        };

        self.broadcast(&session_code, &TransportEvent::MemberJoined(peer_id.clone()), Some(&peer_id))
            .await;

        let (outbound, mut out_rx) = mpsc::channel::<Frame>(self.queue_capacity);
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                hub.route(&session_code, &peer_id, connection_id, frame).await;
            }
            hub.leave(&session_code, &peer_id, connection_id).await;
        });

        Ok(Link { session, members, outbound, inbound })
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
