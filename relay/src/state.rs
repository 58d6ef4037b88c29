//! Shared relay state.
//!
//! DESIGN
//! ======
//! `RelayState` is injected into Axum handlers via the `State` extractor.
//! It holds one `Room` per live session code. A room only knows who opened
//! it, how many tasks the host announced, and who is connected right now;
//! nothing about the session's progress or canvas ever reaches the relay.

use std::collections::HashMap;
use std::sync::Arc;

use frames::{ErrorCode, Frame};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::RelayConfig;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("missing query parameter `{0}`")]
    MissingParam(&'static str),
    #[error("invalid task count: {0}")]
    InvalidTasks(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} is already open under another host")]
    SessionExists(String),
    #[error("session {0} is full")]
    SessionFull(String),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "E_MISSING_PARAM",
            Self::InvalidTasks(_) => "E_INVALID_TASKS",
            Self::SessionNotFound(_) => "E_SESSION_NOT_FOUND",
            Self::SessionExists(_) => "E_SESSION_EXISTS",
            Self::SessionFull(_) => "E_SESSION_FULL",
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// One live connection: the id tells a reconnect apart from the socket it replaced.
pub struct Client {
    pub connection_id: Uuid,
    pub tx: mpsc::Sender<Frame>,
}

/// Per-session broadcast channel. Evicted when the last client leaves.
pub struct Room {
    pub host_peer_id: String,
    pub task_count: usize,
    /// Connected clients keyed by peer id.
    pub clients: HashMap<String, Client>,
}

impl Room {
    #[must_use]
    pub fn new(host_peer_id: String, task_count: usize) -> Self {
        Self { host_peer_id, task_count, clients: HashMap::new() }
    }
}

// =============================================================================
// RELAY STATE
// =============================================================================

#[derive(Clone)]
pub struct RelayState {
    pub rooms: Arc<RwLock<HashMap<String, Room>>>,
    pub config: RelayConfig,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), config }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
