//! Identifiers and value objects shared by every session component.
//!
//! Peer identity is injected as a [`PeerIdentity`] value rather than read from
//! ambient storage, so the protocol runs the same way in tests, in the CLI,
//! and behind a browser.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Presence colors handed out to generated identities.
pub const PEER_COLORS: [&str; 8] =
    ["#E4572E", "#F3A712", "#A8C686", "#29335C", "#669BBC", "#B56576", "#6D597A", "#2A9D8F"];

/// Display label for a peer that has not named themselves yet.
pub const UNNAMED: &str = "unnamed";

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> Millis {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Convert a configured duration into the millisecond arithmetic used by the
/// state machines.
#[must_use]
pub fn duration_ms(duration: Duration) -> Millis {
    i64::try_from(duration.as_millis()).unwrap_or(Millis::MAX)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Opaque, already-unique peer identifier (one per browser session).
    PeerId
);
string_id!(
    /// Puzzle task identifier as exposed by the content provider.
    TaskId
);
string_id!(
    /// Corkboard note identifier.
    NoteId
);

impl PeerId {
    /// Fresh random peer id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl NoteId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Who this peer is. Passed into every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub peer_id: PeerId,
    /// May be empty until the player names themselves.
    pub display_name: String,
    pub color_tag: String,
}

impl PeerIdentity {
    pub fn new(peer_id: PeerId, display_name: impl Into<String>, color_tag: impl Into<String>) -> Self {
        Self { peer_id, display_name: display_name.into(), color_tag: color_tag.into() }
    }

    /// Generate a random peer id and pick a palette color.
    pub fn generate(display_name: impl Into<String>) -> Self {
        let color = PEER_COLORS[rand::rng().random_range(0..PEER_COLORS.len())];
        Self::new(PeerId::generate(), display_name, color)
    }

    /// Name shown to humans.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() { UNNAMED } else { &self.display_name }
    }
}

/// One shared playthrough. Immutable for its lifetime; progress lives in
/// the host's coordinator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_code: String,
    pub host_peer_id: PeerId,
    pub task_count: usize,
}

impl Session {
    pub fn new(session_code: impl Into<String>, host_peer_id: PeerId, task_count: usize) -> Self {
        Self { session_code: session_code.into(), host_peer_id, task_count }
    }

    #[must_use]
    pub fn is_host(&self, peer_id: &PeerId) -> bool {
        &self.host_peer_id == peer_id
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
