//! Terminal view of a running session.
//!
//! The runtime only speaks in events, so the view keeps the latest members,
//! progress, and canvas it has seen to answer `members` and `state`.

use session::canvas::CanvasState;
use session::join::Admission;
use session::moderation::LockReason;
use session::presence::Peer;
use session::progress::ProgressState;
use session::{Event, Session, SessionExit};

pub struct View {
    session: Session,
    members: Vec<Peer>,
    progress: ProgressState,
    canvas: CanvasState,
}

impl View {
    pub fn new(session: Session) -> Self {
        Self { session, members: Vec::new(), progress: ProgressState::default(), canvas: CanvasState::default() }
    }

    /// Record the event and describe it in one line.
    pub fn apply(&mut self, event: &Event) -> String {
        match event {
            Event::MembersChanged(members) => {
                self.members.clone_from(members);
                format!("members: {}", self.member_labels())
            }
            Event::JoinPrompt { peer_id, display_name } => {
                format!("join request from {display_name} ({peer_id}); `approve {peer_id}` or `deny {peer_id}`")
            }
            Event::Admitted(Admission::Host) => "the host let you in".to_owned(),
            Event::Admitted(Admission::Timeout) => "no answer from the host; joined anyway".to_owned(),
            Event::Locked(LockReason::Denied) => "the host declined your request".to_owned(),
            Event::Locked(LockReason::Kicked) => "you were removed from the session".to_owned(),
            Event::ProgressChanged(progress) => {
                self.progress.clone_from(progress);
                format!("progress: {}", self.progress_line())
            }
            Event::AnswerRejected { task_id } => format!("wrong answer for task {task_id}"),
            Event::SessionComplete(summary) => format!(
                "case closed: {} tasks, {} hints, {} players",
                summary.task_count,
                summary.hints_used,
                summary.participants.len()
            ),
            Event::CanvasChanged(canvas) => {
                self.canvas.clone_from(canvas);
                format!("board: {} notes, {} links", canvas.notes.len(), canvas.links.len())
            }
            Event::Reset => "the host restarted the case".to_owned(),
        }
    }

    pub fn members_report(&self) -> String {
        if self.members.is_empty() {
            return "members: (none yet)".to_owned();
        }
        let mut lines = vec!["members:".to_owned()];
        for peer in &self.members {
            let role = if self.session.is_host(&peer.peer_id) { " [host]" } else { "" };
            lines.push(format!("  {} ({}){role}", peer.label(), peer.peer_id));
        }
        lines.join("\n")
    }

    pub fn state_report(&self) -> String {
        let mut lines = vec![format!("session {}: {}", self.session.session_code, self.progress_line())];
        for note in self.canvas.notes.values() {
            lines.push(format!("  note {} at ({}, {}): {}", note.note_id, note.x, note.y, note.text));
        }
        for link in &self.canvas.links {
            let (a, b) = link.ends();
            lines.push(format!("  link {a} <-> {b}"));
        }
        lines.join("\n")
    }

    fn progress_line(&self) -> String {
        let done = self.progress.completed_task_ids.len();
        let total = self.session.task_count;
        if done >= total && total > 0 {
            return format!("{done}/{total} solved, complete");
        }
        let hint = if self.progress.hint_used_for_current { ", hint used" } else { "" };
        format!("{done}/{total} solved, on task {}{hint}", self.progress.current_task_index + 1)
    }

    fn member_labels(&self) -> String {
        self.members
            .iter()
            .map(Peer::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn exit_line(exit: SessionExit) -> &'static str {
    match exit {
        SessionExit::Left => "left the session",
        SessionExit::Disconnected => "lost the connection to the relay",
        SessionExit::Locked(LockReason::Denied) => "not admitted",
        SessionExit::Locked(LockReason::Kicked) => "removed by the host",
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
