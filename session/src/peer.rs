//! Session peer — one participant's complete protocol state.
//!
//! ARCHITECTURE
//! ============
//! `SessionPeer` composes the five components and is driven by four inputs:
//! inbound envelopes, transport membership changes, local commands, and a
//! timer tick. Every input returns an `Outcome`: messages to broadcast and
//! events for the presentation layer. The peer never performs I/O; the
//! runtime owns the channel, exactly like the websocket dispatch layer owns
//! outbound frames for handler functions.
//!
//! AUTHORITY
//! =========
//! Host-only messages from anyone but the recorded host are dropped and
//! logged as suspicious. Proposals and canvas snapshots from kicked or denied
//! peers are dropped silently. Every peer records both sets from the host's
//! broadcasts, so host and guests apply the same filter.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::canvas::{CanvasState, CanvasSync};
use crate::config::SessionConfig;
use crate::content::{PuzzleContent, SessionSummary};
use crate::join::{Admission, AdmissionDesk, DeskOutcome, JoinGate, JoinState, JoinTransition};
use crate::message::{Envelope, HintRequested, Message, PeerTarget, PresenceAnnounce};
use crate::moderation::{KickEffect, LockReason, Moderation};
use crate::presence::{Peer, PresenceRegistry};
use crate::progress::{ProgressCoordinator, ProgressOutcome, ProgressRole, ProgressState};
use crate::types::{Millis, NoteId, PeerId, PeerIdentity, Session, TaskId};

// =============================================================================
// INPUTS / OUTPUTS
// =============================================================================

/// Local intent from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetName(String),
    /// Check an answer against the content provider, then submit (host) or
    /// propose (guest).
    Answer { task_id: TaskId, answer: String },
    UseHint,
    AddNote { text: String, x: f64, y: f64 },
    EditNote { note_id: NoteId, text: String },
    MoveNote { note_id: NoteId, x: f64, y: f64 },
    BeginDrag { note_id: NoteId },
    DragTo { x: f64, y: f64 },
    EndDrag,
    RemoveNote { note_id: NoteId },
    ToggleLink { a: NoteId, b: NoteId },
    Approve(PeerId),
    Deny(PeerId),
    Kick(PeerId),
    Reset,
    Leave,
}

/// Something the presentation layer should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MembersChanged(Vec<Peer>),
    /// Host only: a guest is waiting for accept/decline.
    JoinPrompt { peer_id: PeerId, display_name: String },
    Admitted(Admission),
    /// Terminal. The presentation layer should leave the session.
    Locked(LockReason),
    ProgressChanged(ProgressState),
    AnswerRejected { task_id: TaskId },
    /// Fires once per transition into "all tasks done".
    SessionComplete(SessionSummary),
    /// Committed board after a local edit or an applied remote snapshot.
    CanvasChanged(CanvasState),
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub broadcast: Vec<Message>,
    pub events: Vec<Event>,
}

impl Outcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty() && self.events.is_empty()
    }
}

// =============================================================================
// PEER
// =============================================================================

pub struct SessionPeer {
    identity: PeerIdentity,
    session: Session,
    content: Arc<dyn PuzzleContent>,
    presence: PresenceRegistry,
    gate: JoinGate,
    desk: AdmissionDesk,
    progress: ProgressCoordinator,
    canvas: CanvasSync,
    moderation: Moderation,
    heartbeat_ms: Millis,
    last_heartbeat: Option<Millis>,
    last_members: Vec<PeerId>,
}

impl SessionPeer {
    #[must_use]
    pub fn new(identity: PeerIdentity, session: Session, config: &SessionConfig, content: Arc<dyn PuzzleContent>) -> Self {
        if content.task_count() != session.task_count {
            warn!(
                session = %session.session_code,
                session_tasks = session.task_count,
                content_tasks = content.task_count(),
                "peer: puzzle content disagrees with session task count"
            );
        }
        let role = if session.is_host(&identity.peer_id) { ProgressRole::Host } else { ProgressRole::Mirror };
        let local = identity.peer_id.clone();
        Self {
            presence: PresenceRegistry::new(config.stale_ms()),
            gate: JoinGate::new(local.clone(), config.join_timeout_ms()),
            desk: AdmissionDesk::new(config.admission),
            progress: ProgressCoordinator::new(
                role,
                session.task_count,
                config.catch_up_timeout_ms(),
                config.catch_up_attempts,
            ),
            canvas: CanvasSync::new(local.clone()),
            moderation: Moderation::new(local, session.host_peer_id.clone()),
            heartbeat_ms: config.heartbeat_ms(),
            last_heartbeat: None,
            last_members: Vec::new(),
            identity,
            session,
            content,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.session.is_host(&self.identity.peer_id)
    }

    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.is_host() || self.gate.is_admitted()
    }

    #[must_use]
    pub fn locked(&self) -> Option<LockReason> {
        self.moderation.locked()
    }

    #[must_use]
    pub fn join_state(&self) -> JoinState {
        self.gate.state()
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressCoordinator {
        &self.progress
    }

    #[must_use]
    pub fn canvas(&self) -> &CanvasSync {
        &self.canvas
    }

    #[must_use]
    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    #[must_use]
    pub fn admissions(&self) -> &AdmissionDesk {
        &self.desk
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Known, live, not-kicked peers as this peer sees them.
    #[must_use]
    pub fn effective_members(&self, now: Millis) -> Vec<Peer> {
        self.presence.effective_members(self.moderation.kicked(), now)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// First contact with the channel: announce ourselves and, as a guest,
    /// ask to join. Calling it again only re-announces.
    pub fn start(&mut self, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        self.presence.announce(&self.identity, now);
        out.broadcast.push(self.announce_message());
        self.last_heartbeat = Some(now);

        if !self.is_host() {
            if let Some(request) = self.gate.begin(&self.identity.display_name, now) {
                info!(session = %self.session.session_code, peer = %self.identity.peer_id, "peer: requesting to join");
                out.broadcast.push(request);
            }
        }
        self.refresh_members(now, &mut out);
        out
    }

    /// Timer tick: join fallback, catch-up retries, heartbeats, staleness.
    pub fn tick(&mut self, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        if self.locked().is_some() {
            return out;
        }

        if let Some(JoinTransition::Approved(via)) = self.gate.poll(now) {
            info!(peer = %self.identity.peer_id, "peer: no answer from host, admitting after timeout");
            self.on_admitted(via, now, &mut out);
        }
        if let Some(retry) = self.progress.poll(now) {
            out.broadcast.push(retry);
        }
        let heartbeat_due = self
            .last_heartbeat
            .is_some_and(|last| now.saturating_sub(last) >= self.heartbeat_ms);
        if heartbeat_due {
            self.last_heartbeat = Some(now);
            self.presence.heartbeat(&self.identity.peer_id, now);
            out.broadcast.push(Message::PresenceHeartbeat);
        }

        self.refresh_members(now, &mut out);
        out
    }

    pub fn member_joined(&mut self, peer_id: &PeerId, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        self.presence.transport_joined(peer_id, now);
        self.refresh_members(now, &mut out);
        out
    }

    pub fn member_left(&mut self, peer_id: &PeerId, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        self.presence.transport_left(peer_id);
        self.refresh_members(now, &mut out);
        out
    }

    /// The transport came back after a drop. `members` are the peers on the
    /// new link. Re-announces without a second `JoinRequest`, then refreshes
    /// progress: the host rebroadcasts, an admitted guest asks for catch-up.
    pub fn reconnected(&mut self, members: &[PeerId], now: Millis) -> Outcome {
        let mut out = Outcome::default();
        if self.locked().is_some() {
            return out;
        }
        for known in self.presence.known() {
            if known != self.identity.peer_id && !members.contains(&known) {
                self.presence.transport_left(&known);
            }
        }
        for member in members {
            self.presence.transport_joined(member, now);
        }

        let started = self.start(now);
        out.broadcast.extend(started.broadcast);
        out.events.extend(started.events);
        if self.is_host() {
            out.broadcast.push(self.progress.snapshot_message());
        } else if self.gate.is_admitted() {
            out.broadcast.push(self.progress.request_catch_up(now));
        }
        info!(peer = %self.identity.peer_id, members = members.len(), "peer: reattached after transport drop");
        self.refresh_members(now, &mut out);
        out
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    pub fn handle_envelope(&mut self, envelope: Envelope, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        let sender = envelope.sender;
        if sender == self.identity.peer_id || self.locked().is_some() {
            return out;
        }
        if !envelope.session_code.is_empty() && envelope.session_code != self.session.session_code {
            debug!(expected = %self.session.session_code, got = %envelope.session_code, "peer: frame for another session");
            return out;
        }
        if envelope.message.requires_host() && !self.session.is_host(&sender) {
            warn!(
                session = %self.session.session_code,
                %sender,
                syscall = envelope.message.syscall(),
                "peer: rejected host-only message from non-host sender"
            );
            return out;
        }

        self.presence.heartbeat(&sender, now);

        match envelope.message {
            Message::PresenceAnnounce(PresenceAnnounce { display_name, color_tag }) => {
                self.presence
                    .announce(&PeerIdentity::new(sender.clone(), display_name, color_tag), now);
            }
            Message::PresenceHeartbeat => {}
            Message::JoinRequest(request) => {
                if self.is_host() {
                    self.on_join_request(&sender, &request.display_name, &mut out);
                }
            }
            Message::JoinApproved(target) => {
                if let Some(JoinTransition::Approved(via)) = self.gate.on_approved(&target.peer_id) {
                    info!(peer = %self.identity.peer_id, "peer: host approved join");
                    self.on_admitted(via, now, &mut out);
                }
            }
            Message::JoinDenied(target) => {
                if self.moderation.on_denied(&target.peer_id) {
                    debug!(peer_id = %target.peer_id, "peer: member denied");
                }
                if self.gate.on_denied(&target.peer_id) == Some(JoinTransition::Denied) {
                    info!(peer = %self.identity.peer_id, "peer: host denied join");
                    self.lock(LockReason::Denied, &mut out);
                }
            }
            Message::ProgressRequest => {
                if self.is_host() && self.accepts_from(&sender) {
                    out.broadcast.push(self.progress.snapshot_message());
                    if let Some(snapshot) = self.canvas.snapshot() {
                        out.broadcast.push(Message::CanvasUpdated(snapshot));
                    }
                }
            }
            Message::ProgressUpdated(snapshot) => {
                let result = self.progress.apply(snapshot);
                self.absorb(result, now, &mut out);
            }
            Message::TaskAnswered(proposal) => {
                if self.is_host() && self.accepts_from(&sender) {
                    if proposal.peer_id != sender {
                        debug!(%sender, claimed = %proposal.peer_id, "peer: proposal attributed to sender");
                    }
                    let result = self.progress.merge_proposal(&sender, &proposal.task_id, self.content.as_ref());
                    self.absorb(result, now, &mut out);
                }
            }
            Message::HintRequested(HintRequested { task_index }) => {
                if self.is_host() && self.accepts_from(&sender) {
                    let result = self.progress.merge_hint_request(task_index);
                    self.absorb(result, now, &mut out);
                }
            }
            Message::CanvasUpdated(snapshot) => {
                if self.accepts_from(&sender) && self.canvas.apply_remote(snapshot) {
                    out.events.push(Event::CanvasChanged(self.canvas.state().clone()));
                }
            }
            Message::PlayerKicked(target) => match self.moderation.on_kicked(&target.peer_id) {
                Some(KickEffect::SelfLocked) => {
                    info!(peer = %self.identity.peer_id, "peer: kicked by host");
                    out.events.push(Event::Locked(LockReason::Kicked));
                }
                Some(KickEffect::Removed(peer_id)) => {
                    debug!(%peer_id, "peer: member kicked");
                }
                None => {}
            },
            Message::GameReset(reset) => {
                let result = self.progress.on_reset(reset.clock);
                self.absorb(result, now, &mut out);
            }
        }

        self.refresh_members(now, &mut out);
        out
    }

    fn on_join_request(&mut self, sender: &PeerId, display_name: &str, out: &mut Outcome) {
        if self.moderation.is_kicked(sender) {
            // A kicked peer that comes back under the same id is told again.
            out.broadcast
                .push(Message::PlayerKicked(PeerTarget { peer_id: sender.clone() }));
            return;
        }
        match self.desk.on_request(sender, display_name) {
            DeskOutcome::Prompt { peer_id, display_name } => {
                info!(%peer_id, name = %display_name, "peer: join request awaiting host");
                out.events.push(Event::JoinPrompt { peer_id, display_name });
            }
            DeskOutcome::Reply(reply) => out.broadcast.push(reply),
            DeskOutcome::Nothing => {}
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn handle_command(&mut self, command: Command, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        if self.locked().is_some() {
            debug!(?command, "peer: ignoring command while locked");
            return out;
        }

        match command {
            Command::SetName(name) => {
                self.identity.display_name = name;
                self.presence.announce(&self.identity, now);
                out.broadcast.push(self.announce_message());
            }
            Command::Answer { task_id, answer } => {
                if !self.content.check_answer(&task_id, &answer) {
                    out.events.push(Event::AnswerRejected { task_id });
                } else if self.is_host() {
                    out = self.submit(&task_id, true, now);
                } else {
                    out = self.propose_answered(&task_id);
                }
            }
            Command::UseHint => out = self.use_hint(now),
            Command::AddNote { text, x, y } => {
                if self.can_edit_canvas() {
                    let (_, message) = self.canvas.add_note(&text, x, y, now);
                    self.canvas_published(Some(message), &mut out);
                }
            }
            Command::EditNote { note_id, text } => {
                if self.can_edit_canvas() {
                    let message = self.canvas.edit_note(&note_id, &text, now);
                    self.canvas_published(message, &mut out);
                }
            }
            Command::MoveNote { note_id, x, y } => {
                if self.can_edit_canvas() {
                    let message = self.canvas.move_note(&note_id, x, y, now);
                    self.canvas_published(message, &mut out);
                }
            }
            Command::BeginDrag { note_id } => {
                if self.can_edit_canvas() && self.canvas.begin_drag(&note_id) {
                    out.events.push(Event::CanvasChanged(self.canvas.state().clone()));
                }
            }
            Command::DragTo { x, y } => {
                if self.canvas.drag_to(x, y) {
                    out.events.push(Event::CanvasChanged(self.canvas.state().clone()));
                }
            }
            Command::EndDrag => {
                let message = self.canvas.end_drag(now);
                self.canvas_published(message, &mut out);
            }
            Command::RemoveNote { note_id } => {
                if self.can_edit_canvas() {
                    let message = self.canvas.remove_note(&note_id, now);
                    self.canvas_published(message, &mut out);
                }
            }
            Command::ToggleLink { a, b } => {
                if self.can_edit_canvas() {
                    let message = self.canvas.toggle_link(&a, &b, now);
                    self.canvas_published(message, &mut out);
                }
            }
            Command::Approve(peer_id) => {
                if self.is_host() {
                    out.broadcast.extend(self.desk.approve(&peer_id));
                }
            }
            Command::Deny(peer_id) => {
                if self.is_host() {
                    if let Some(message) = self.desk.deny(&peer_id) {
                        self.moderation.on_denied(&peer_id);
                        out.broadcast.push(message);
                    }
                }
            }
            Command::Kick(peer_id) => {
                if let Some(message) = self.moderation.kick(&peer_id) {
                    info!(%peer_id, "peer: kicking");
                    out.broadcast.push(message);
                }
            }
            Command::Reset => {
                let result = self.moderation.reset(&mut self.progress);
                self.absorb(result, now, &mut out);
            }
            Command::Leave => {}
        }

        self.refresh_members(now, &mut out);
        out
    }

    /// Host: record a submission for a task.
    pub fn submit(&mut self, task_id: &TaskId, is_correct: bool, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        let solver = self.identity.peer_id.clone();
        let result = self.progress.submit(task_id, is_correct, &solver, self.content.as_ref());
        self.absorb(result, now, &mut out);
        out
    }

    /// Guest: tell the host a task was solved. Carries no authority.
    pub fn propose_answered(&mut self, task_id: &TaskId) -> Outcome {
        let mut out = Outcome::default();
        if !self.is_admitted() {
            debug!(%task_id, "peer: not admitted, dropping proposal");
            return out;
        }
        out.broadcast
            .extend(self.progress.propose(&self.identity.peer_id, task_id));
        out
    }

    /// Host marks the hint used; a guest asks the host to.
    pub fn use_hint(&mut self, now: Millis) -> Outcome {
        let mut out = Outcome::default();
        if self.is_host() {
            let result = self.progress.use_hint();
            self.absorb(result, now, &mut out);
        } else if self.is_admitted() {
            let task_index = self.progress.state().current_task_index;
            out.broadcast
                .push(Message::HintRequested(HintRequested { task_index }));
        }
        out
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn announce_message(&self) -> Message {
        Message::PresenceAnnounce(PresenceAnnounce {
            display_name: self.identity.display_name.clone(),
            color_tag: self.identity.color_tag.clone(),
        })
    }

    fn on_admitted(&mut self, via: Admission, now: Millis, out: &mut Outcome) {
        out.events.push(Event::Admitted(via));
        out.broadcast.push(self.progress.request_catch_up(now));
    }

    fn lock(&mut self, reason: LockReason, out: &mut Outcome) {
        if self.moderation.lock(reason) {
            out.events.push(Event::Locked(reason));
        }
    }

    /// Kicked and denied peers cannot propose or edit, as seen by any peer.
    fn accepts_from(&self, sender: &PeerId) -> bool {
        !self.moderation.is_excluded(sender)
    }

    fn can_edit_canvas(&self) -> bool {
        self.is_admitted()
    }

    fn canvas_published(&mut self, message: Option<Message>, out: &mut Outcome) {
        if let Some(message) = message {
            out.broadcast.push(message);
            out.events.push(Event::CanvasChanged(self.canvas.state().clone()));
        }
    }

    fn absorb(&mut self, result: ProgressOutcome, now: Millis, out: &mut Outcome) {
        out.broadcast.extend(result.broadcast);
        if result.reset {
            out.events.push(Event::Reset);
        }
        if result.changed {
            out.events
                .push(Event::ProgressChanged(self.progress.state().clone()));
        }
        if result.completed {
            info!(session = %self.session.session_code, "peer: all tasks complete");
            out.events.push(Event::SessionComplete(self.summary(now)));
        }
    }

    #[must_use]
    pub fn summary(&self, now: Millis) -> SessionSummary {
        SessionSummary {
            session_code: self.session.session_code.clone(),
            host_peer_id: self.session.host_peer_id.clone(),
            task_count: self.session.task_count,
            solved_by: self.progress.state().solved_by.clone(),
            hints_used: self.progress.hints_used(),
            participants: self
                .presence
                .known()
                .into_iter()
                .filter(|p| !self.moderation.is_kicked(p))
                .collect(),
            completed_at: now,
        }
    }

    fn refresh_members(&mut self, now: Millis, out: &mut Outcome) {
        let members = self.effective_members(now);
        let ids: Vec<PeerId> = members.iter().map(|p| p.peer_id.clone()).collect();
        if ids != self.last_members {
            self.last_members = ids;
            out.events.push(Event::MembersChanged(members));
        }
    }
}

#[cfg(test)]
#[path = "peer_test.rs"]
mod tests;
