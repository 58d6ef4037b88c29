//! Session runtime — drives one `SessionPeer` over a transport link.
//!
//! ARCHITECTURE
//! ============
//! One spawned task per joined session. It owns the peer and the link and
//! multiplexes three inputs with `tokio::select!`: transport events, local
//! commands, and a timer tick. Each input yields an `Outcome`; the task
//! encodes the broadcasts into frames, forwards the events to the
//! presentation layer, and hands the completion summary to the sink when
//! this peer is the host.
//!
//! When the transport closes the task re-attaches with the same request, up
//! to `reconnect_attempts` times, and keeps the same `SessionPeer`. The join
//! gate, mirror, and canvas survive, so a guest never asks to join twice.
//!
//! The task ends on `Command::Leave`, when the command sender is dropped,
//! when reconnecting fails, or when the peer locks itself (denied or
//! kicked). Dropping the link is what tells the other peers we left.

use std::sync::Arc;

use frames::ErrorCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::content::{PuzzleContent, SummarySink};
use crate::message::{Envelope, MessageError};
use crate::moderation::LockReason;
use crate::peer::{Command, Event, Outcome, SessionPeer};
use crate::transport::{ConnectRequest, Link, Transport, TransportError, TransportEvent};
use crate::types::{PeerIdentity, Session, now_ms};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("session task failed: {0}")]
    Task(String),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::Message(_) => "E_MESSAGE",
            Self::Task(_) => "E_SESSION_TASK",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(e) if e.retryable())
    }
}

/// Why the session task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Left,
    Disconnected,
    Locked(LockReason),
}

/// Everything needed to start a session peer.
pub struct SessionOptions {
    pub identity: PeerIdentity,
    pub session_code: String,
    pub content: Arc<dyn PuzzleContent>,
    pub config: SessionConfig,
    /// Only the host records summaries.
    pub sink: Arc<dyn SummarySink>,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Caller's side of a running session.
pub struct SessionHandle {
    session: Session,
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<Event>,
    task: JoinHandle<Result<SessionExit, SessionError>>,
}

impl SessionHandle {
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A sender for commands that can be moved into another task.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// # Errors
    ///
    /// Returns `Transport(Closed)` once the session task has stopped.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Transport(TransportError::Closed))
    }

    /// Next event for the presentation layer; `None` after the task stops.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Leave the session and wait for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns whatever stopped the task, or `Task` if it panicked.
    pub async fn leave(self) -> Result<SessionExit, SessionError> {
        if self.commands.send(Command::Leave).await.is_err() {
            debug!("runtime: session already stopped");
        }
        self.finished().await
    }

    /// Wait for the task to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns whatever stopped the task, or `Task` if it panicked.
    pub async fn finished(self) -> Result<SessionExit, SessionError> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| SessionError::Task(e.to_string()))?
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Open a new session as its host.
///
/// # Errors
///
/// Returns the transport's connect error, e.g. `SessionExists`.
pub async fn host_session(transport: Arc<dyn Transport>, options: SessionOptions) -> Result<SessionHandle, SessionError> {
    let session = Session::new(
        options.session_code.clone(),
        options.identity.peer_id.clone(),
        options.content.task_count(),
    );
    let request = ConnectRequest {
        session_code: options.session_code.clone(),
        peer_id: options.identity.peer_id.clone(),
        open: Some(session),
    };
    start(transport, request, options).await
}

/// Join an existing session as a guest.
///
/// # Errors
///
/// Returns the transport's connect error, e.g. `SessionNotFound`.
pub async fn join_session(transport: Arc<dyn Transport>, options: SessionOptions) -> Result<SessionHandle, SessionError> {
    let request = ConnectRequest {
        session_code: options.session_code.clone(),
        peer_id: options.identity.peer_id.clone(),
        open: None,
    };
    start(transport, request, options).await
}

async fn start(
    transport: Arc<dyn Transport>,
    request: ConnectRequest,
    options: SessionOptions,
) -> Result<SessionHandle, SessionError> {
    let link = transport.connect(request.clone()).await?;
    let session = link.session.clone();
    info!(
        session = %session.session_code,
        peer = %options.identity.peer_id,
        host = %session.host_peer_id,
        members = link.members.len(),
        "runtime: connected"
    );

    let capacity = options.config.command_queue_capacity;
    let (commands, command_rx) = mpsc::channel(capacity);
    let (event_tx, events) = mpsc::channel(capacity);
    let peer = SessionPeer::new(options.identity, session.clone(), &options.config, options.content);
    let driver = Driver {
        peer,
        outbound: link.outbound.clone(),
        events: event_tx,
        sink: options.sink,
        transport,
        request,
    };
    let task = tokio::spawn(driver.run(link, command_rx, options.config));

    Ok(SessionHandle { session, commands, events, task })
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    peer: SessionPeer,
    outbound: mpsc::Sender<frames::Frame>,
    events: mpsc::Sender<Event>,
    sink: Arc<dyn SummarySink>,
    transport: Arc<dyn Transport>,
    request: ConnectRequest,
}

enum Input {
    Transport(Option<TransportEvent>),
    Command(Option<Command>),
    Tick,
}

impl Driver {
    async fn run(
        mut self,
        link: Link,
        mut commands: mpsc::Receiver<Command>,
        config: SessionConfig,
    ) -> Result<SessionExit, SessionError> {
        let Link { members, mut inbound, .. } = link;

        let now = now_ms();
        for member in &members {
            let outcome = self.peer.member_joined(member, now);
            self.dispatch(outcome).await?;
        }
        let outcome = self.peer.start(now);
        self.dispatch(outcome).await?;

        let mut ticker = tokio::time::interval(config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let input = tokio::select! {
                event = inbound.recv() => Input::Transport(event),
                command = commands.recv() => Input::Command(command),
                _ = ticker.tick() => Input::Tick,
            };

            let outcome = match input {
                Input::Transport(Some(TransportEvent::Frame(frame))) => match Envelope::from_frame(frame) {
                    Ok(envelope) => self.peer.handle_envelope(envelope, now_ms()),
                    Err(e) => {
                        warn!(error = %e, "runtime: dropping malformed frame");
                        continue;
                    }
                },
                Input::Transport(Some(TransportEvent::MemberJoined(peer_id))) => self.peer.member_joined(&peer_id, now_ms()),
                Input::Transport(Some(TransportEvent::MemberLeft(peer_id))) => self.peer.member_left(&peer_id, now_ms()),
                Input::Transport(Some(TransportEvent::Closed) | None) => {
                    info!(peer = %self.peer.identity().peer_id, "runtime: transport closed");
                    let Some(link) = self.reconnect(&config).await else {
                        return Ok(SessionExit::Disconnected);
                    };
                    let Link { members, inbound: fresh, outbound, .. } = link;
                    inbound = fresh;
                    self.outbound = outbound;
                    self.peer.reconnected(&members, now_ms())
                }
                Input::Command(Some(Command::Leave) | None) => {
                    info!(peer = %self.peer.identity().peer_id, "runtime: leaving session");
                    return Ok(SessionExit::Left);
                }
                Input::Command(Some(command)) => self.peer.handle_command(command, now_ms()),
                Input::Tick => self.peer.tick(now_ms()),
            };

            self.dispatch(outcome).await?;
            if let Some(reason) = self.peer.locked() {
                info!(peer = %self.peer.identity().peer_id, ?reason, "runtime: locked out of session");
                return Ok(SessionExit::Locked(reason));
            }
        }
    }

    /// Re-attach to the same session. Gives up on a non-retryable error or
    /// when the channel now describes a different session.
    async fn reconnect(&self, config: &SessionConfig) -> Option<Link> {
        let peer_id = &self.peer.identity().peer_id;
        for attempt in 1..=config.reconnect_attempts {
            tokio::time::sleep(config.reconnect_delay).await;
            match self.transport.connect(self.request.clone()).await {
                Ok(link) if &link.session == self.peer.session() => {
                    info!(peer = %peer_id, attempt, "runtime: reconnected");
                    return Some(link);
                }
                Ok(link) => {
                    warn!(peer = %peer_id, host = %link.session.host_peer_id, "runtime: session changed while away");
                    return None;
                }
                Err(e) if e.retryable() => {
                    warn!(peer = %peer_id, attempt, error = %e, "runtime: reconnect failed");
                }
                Err(e) => {
                    warn!(peer = %peer_id, code = e.error_code(), error = %e, "runtime: giving up on reconnect");
                    return None;
                }
            }
        }
        None
    }

    async fn dispatch(&mut self, outcome: Outcome) -> Result<(), SessionError> {
        let Outcome { broadcast, events } = outcome;
        let session_code = self.peer.session().session_code.clone();
        for message in broadcast {
            let envelope = Envelope::new(self.peer.identity().peer_id.clone(), session_code.clone(), message);
            let frame = envelope.to_frame()?;
            self.outbound
                .send(frame)
                .await
                .map_err(|_| TransportError::Closed)?;
        }

        for event in events {
            if let Event::SessionComplete(summary) = &event {
                if self.peer.is_host() {
                    self.sink.record(summary).await;
                }
            }
            if self.events.send(event).await.is_err() {
                debug!("runtime: event receiver dropped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
