//! Message — the typed protocol carried on one broadcast channel per session.
//!
//! ARCHITECTURE
//! ============
//! On the wire every message is a `frames::Frame`. Inside the core it is a
//! `Message` enum, so adding a variant forces every handler's `match` to
//! deal with it. `Envelope` pairs a message with its sender and session code;
//! the sender is whatever the transport stamped into `frame.from`.
//!
//! DESIGN
//! ======
//! - Syscall names are `area:event` (`"progress:updated"`), matching the
//!   prefix routing used by the relay and logs.
//! - Payloads are serde structs serialized into `frame.data`.
//! - Host-only variants are flagged by [`Message::requires_host`]; receivers
//!   reject them from anyone but the recorded host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::canvas::CanvasSnapshot;
use crate::progress::ProgressState;
use crate::types::{Millis, PeerId, TaskId, now_ms};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
    #[error("frame {0} carries no sender")]
    MissingSender(String),
    #[error("invalid payload for {syscall}: {source}")]
    InvalidPayload {
        syscall: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceAnnounce {
    pub display_name: String,
    pub color_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
}

/// Payload of the host's join decisions and of `PlayerKicked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTarget {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnswered {
    pub peer_id: PeerId,
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintRequested {
    /// Task the hint is for; the host drops requests for a task no longer in flight.
    pub task_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameReset {
    /// Logical clock of the reset progress state.
    pub clock: u64,
}

// =============================================================================
// MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PresenceAnnounce(PresenceAnnounce),
    PresenceHeartbeat,
    JoinRequest(JoinRequest),
    JoinApproved(PeerTarget),
    JoinDenied(PeerTarget),
    ProgressRequest,
    ProgressUpdated(ProgressState),
    TaskAnswered(TaskAnswered),
    HintRequested(HintRequested),
    CanvasUpdated(CanvasSnapshot),
    PlayerKicked(PeerTarget),
    GameReset(GameReset),
}

impl Message {
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::PresenceAnnounce(_) => "presence:announce",
            Self::PresenceHeartbeat => "presence:heartbeat",
            Self::JoinRequest(_) => "join:request",
            Self::JoinApproved(_) => "join:approved",
            Self::JoinDenied(_) => "join:denied",
            Self::ProgressRequest => "progress:request",
            Self::ProgressUpdated(_) => "progress:updated",
            Self::TaskAnswered(_) => "task:answered",
            Self::HintRequested(_) => "hint:requested",
            Self::CanvasUpdated(_) => "canvas:updated",
            Self::PlayerKicked(_) => "player:kicked",
            Self::GameReset(_) => "game:reset",
        }
    }

    /// Messages only the session host may emit.
    #[must_use]
    pub fn requires_host(&self) -> bool {
        matches!(
            self,
            Self::JoinApproved(_)
                | Self::JoinDenied(_)
                | Self::ProgressUpdated(_)
                | Self::PlayerKicked(_)
                | Self::GameReset(_)
        )
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::PresenceHeartbeat | Self::ProgressRequest => Ok(Value::Object(serde_json::Map::new())),
            Self::PresenceAnnounce(p) => serde_json::to_value(p),
            Self::JoinRequest(p) => serde_json::to_value(p),
            Self::JoinApproved(p) | Self::JoinDenied(p) | Self::PlayerKicked(p) => serde_json::to_value(p),
            Self::ProgressUpdated(p) => serde_json::to_value(p),
            Self::TaskAnswered(p) => serde_json::to_value(p),
            Self::HintRequested(p) => serde_json::to_value(p),
            Self::CanvasUpdated(p) => serde_json::to_value(p),
            Self::GameReset(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild a message from its syscall and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSyscall` for names outside the protocol and
    /// `InvalidPayload` when the data does not match the variant's shape.
    pub fn from_parts(syscall: &str, data: Value) -> Result<Self, MessageError> {
        fn parse<T: serde::de::DeserializeOwned>(syscall: &str, data: Value) -> Result<T, MessageError> {
            serde_json::from_value(data)
                .map_err(|source| MessageError::InvalidPayload { syscall: syscall.to_owned(), source })
        }

        let message = match syscall {
            "presence:announce" => Self::PresenceAnnounce(parse(syscall, data)?),
            "presence:heartbeat" => Self::PresenceHeartbeat,
            "join:request" => Self::JoinRequest(parse(syscall, data)?),
            "join:approved" => Self::JoinApproved(parse(syscall, data)?),
            "join:denied" => Self::JoinDenied(parse(syscall, data)?),
            "progress:request" => Self::ProgressRequest,
            "progress:updated" => Self::ProgressUpdated(parse(syscall, data)?),
            "task:answered" => Self::TaskAnswered(parse(syscall, data)?),
            "hint:requested" => Self::HintRequested(parse(syscall, data)?),
            "canvas:updated" => Self::CanvasUpdated(parse(syscall, data)?),
            "player:kicked" => Self::PlayerKicked(parse(syscall, data)?),
            "game:reset" => Self::GameReset(parse(syscall, data)?),
            other => return Err(MessageError::UnknownSyscall(other.to_owned())),
        };
        Ok(message)
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// A message plus the routing facts receivers need to judge it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub sender: PeerId,
    /// Empty when the transport did not stamp a session code.
    pub session_code: String,
    pub sent_at: Millis,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: PeerId, session_code: impl Into<String>, message: Message) -> Self {
        Self { id: Uuid::new_v4().to_string(), sender, session_code: session_code.into(), sent_at: now_ms(), message }
    }

    /// Convert into a wire frame.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` if the payload cannot be represented as JSON.
    pub fn to_frame(&self) -> Result<frames::Frame, MessageError> {
        let syscall = self.message.syscall();
        let data = self
            .message
            .payload()
            .map_err(|source| MessageError::InvalidPayload { syscall: syscall.to_owned(), source })?;
        Ok(frames::Frame {
            id: self.id.clone(),
            ts: self.sent_at,
            session: Some(self.session_code.clone()),
            from: Some(self.sender.to_string()),
            syscall: syscall.to_owned(),
            data,
        })
    }

    /// Parse a wire frame.
    ///
    /// # Errors
    ///
    /// Returns `MissingSender` for frames without `from`, plus any error from
    /// [`Message::from_parts`].
    pub fn from_frame(frame: frames::Frame) -> Result<Self, MessageError> {
        let Some(from) = frame.from.filter(|f| !f.is_empty()) else {
            return Err(MessageError::MissingSender(frame.id));
        };
        let message = Message::from_parts(&frame.syscall, frame.data)?;
        Ok(Self {
            id: frame.id,
            sender: PeerId::new(from),
            session_code: frame.session.unwrap_or_default(),
            sent_at: frame.ts,
            message,
        })
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
