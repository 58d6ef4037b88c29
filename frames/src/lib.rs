//! Shared frame model and protobuf codec for the session broadcast channel.
//!
//! This crate owns the wire representation used by the `relay`, the `cli`
//! peer, and the `session` core. Payloads stay flexible
//! (`serde_json::Value`) while the envelope is encoded as protobuf for
//! compact binary transport.
//!
//! Every frame is a broadcast: there is no request/response correlation on
//! this channel. Peers address each other only through the session code.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Syscall of a structured error frame.
pub const SYSCALL_ERROR: &str = "error";
/// Payload keys of a structured error frame.
pub const FRAME_CODE: &str = "code";
pub const FRAME_MESSAGE: &str = "message";
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TRANSPORT SYSCALLS
// =============================================================================

/// First frame the relay sends on a new connection.
pub const SYSCALL_CONNECTED: &str = "session:connected";
/// Another peer subscribed to the session channel.
pub const SYSCALL_MEMBER_JOINED: &str = "member:joined";
/// Another peer's connection closed.
pub const SYSCALL_MEMBER_LEFT: &str = "member:left";

/// Payload of `session:connected`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub session_code: String,
    pub host_peer_id: String,
    pub task_count: usize,
    /// Peers connected before this one, excluding it.
    pub members: Vec<String>,
}

/// Payload of `member:joined` and `member:left`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNotice {
    pub peer_id: String,
}

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The frame decoded but carries no syscall, so nobody can route it.
    #[error("frame {0} has an empty syscall")]
    MissingSyscall(String),
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_FRAME_DECODE",
            Self::MissingSyscall(_) => "E_FRAME_SYSCALL",
        }
    }
}

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// A single message on the session broadcast channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    /// Session code the frame was broadcast on, if already stamped.
    pub session: Option<String>,
    /// Sending peer id. The relay overwrites this with the connected peer.
    pub from: Option<String>,
    /// Namespaced message name, e.g. `"progress:updated"`.
    pub syscall: String,
    /// Arbitrary JSON payload.
    pub data: Value,
}

impl Frame {
    /// Create an unstamped frame. The relay fills in `session` and `from`.
    pub fn new(syscall: impl Into<String>, data: Value) -> Self {
        Self { id: Uuid::new_v4().to_string(), ts: now_ms(), session: None, from: None, syscall: syscall.into(), data }
    }

    /// Structured error frame built from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Map::new();
        data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_owned()));
        data.insert(FRAME_MESSAGE.into(), Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        Self::new(SYSCALL_ERROR, Value::Object(data))
    }

    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = frame_to_wire(frame);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot run out of buffer space.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::MissingSyscall`] for frames that cannot be routed.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    wire_to_frame(wire)
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        id: frame.id.clone(),
        ts: frame.ts,
        session: frame.session.clone(),
        from: frame.from.clone(),
        syscall: frame.syscall.clone(),
        data: Some(json_to_proto_value(&frame.data)),
    }
}

fn wire_to_frame(wire: WireFrame) -> Result<Frame, CodecError> {
    if wire.syscall.is_empty() {
        return Err(CodecError::MissingSyscall(wire.id));
    }
    Ok(Frame {
        id: wire.id,
        ts: wire.ts,
        session: wire.session,
        from: wire.from,
        syscall: wire.syscall,
        data: wire
            .data
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
    })
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => {
            prost_types::value::Kind::NullValue(prost_types::NullValue::NullValue as i32)
        }
        Value::Bool(v) => prost_types::value::Kind::BoolValue(*v),
        Value::Number(v) => prost_types::value::Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => prost_types::value::Kind::StringValue(v.clone()),
        Value::Array(v) => prost_types::value::Kind::ListValue(prost_types::ListValue {
            values: v.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(v) => prost_types::value::Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        prost_types::value::Kind::NullValue(_) => Value::Null,
        prost_types::value::Kind::NumberValue(v) => number_to_json(*v),
        prost_types::value::Kind::StringValue(v) => Value::String(v.clone()),
        prost_types::value::Kind::BoolValue(v) => Value::Bool(*v),
        prost_types::value::Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        prost_types::value::Kind::ListValue(v) => {
            Value::Array(v.values.iter().map(proto_to_json_value).collect())
        }
    }
}

/// Protobuf only carries doubles. Integral values come back as JSON integers
/// so counters and logical clocks deserialize into `u64` fields again.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(v: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if v.fract() == 0.0 && v.abs() < MAX_EXACT {
        let int = v as i64;
        if int >= 0 {
            return Value::Number(serde_json::Number::from(int.unsigned_abs()));
        }
        return Value::Number(serde_json::Number::from(int));
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    ts: i64,
    #[prost(string, optional, tag = "3")]
    session: Option<String>,
    #[prost(string, optional, tag = "4")]
    from: Option<String>,
    #[prost(string, tag = "5")]
    syscall: String,
    #[prost(message, optional, tag = "6")]
    data: Option<prost_types::Value>,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
