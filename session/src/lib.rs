//! Peer-to-peer session protocol for a cooperative puzzle game.
//!
//! Several players share one playthrough over a single broadcast channel per
//! session. There is no game server: the peer that created the session is
//! the host and the only authority over puzzle progress, join approval, and
//! moderation. Everything else is replicated state each peer rebuilds from
//! the channel.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Ids, peer identity, the immutable [`types::Session`] |
//! | [`config`] | Protocol timing knobs from the environment |
//! | [`message`] | Typed protocol messages and their frame envelope |
//! | [`presence`] | Who is live on the channel |
//! | [`join`] | Guest join gate and host admission desk |
//! | [`progress`] | Host-authoritative puzzle progress and guest mirrors |
//! | [`canvas`] | Shared corkboard with whole-state last-writer-wins |
//! | [`moderation`] | Kick and deny exclusion, reset |
//! | [`content`] | Puzzle content and summary sink seams |
//! | [`peer`] | One participant's composed protocol state |
//! | [`transport`] | Broadcast channel seam and in-memory hub |
//! | [`runtime`] | Async task driving a peer over a transport |

pub mod canvas;
pub mod config;
pub mod content;
pub mod join;
pub mod message;
pub mod moderation;
pub mod peer;
pub mod presence;
pub mod progress;
pub mod runtime;
pub mod transport;
pub mod types;

pub use config::SessionConfig;
pub use content::{AnswerKey, LogSummarySink, PuzzleContent, SessionSummary, SummarySink};
pub use peer::{Command, Event, Outcome, SessionPeer};
pub use runtime::{SessionError, SessionExit, SessionHandle, SessionOptions, host_session, join_session};
pub use transport::{MemoryHub, Transport, TransportError, TransportEvent};
pub use types::{PeerId, PeerIdentity, Session, TaskId};
