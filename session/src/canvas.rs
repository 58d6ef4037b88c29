//! Canvas sync — the shared corkboard of notes and links.
//!
//! DESIGN
//! ======
//! Local edits apply immediately, then the *whole* board is broadcast with a
//! `Stamp` (wall-clock millis, ties broken by peer id). A remote snapshot
//! replaces local state only if its stamp is not older than the last one
//! applied: whole-state last-writer-wins, no per-field merge.
//!
//! Two peers editing at once can lose one edit when their broadcasts race.
//! The board is a collaboration aid, not game state, so that is accepted;
//! per-note operations with per-note clocks are the upgrade path.
//!
//! Drags stay local until release; only the final position is broadcast.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::Message;
use crate::types::{Millis, NoteId, PeerId};

// =============================================================================
// MODEL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub note_id: NoteId,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub created_by: PeerId,
}

/// Undirected edge between two notes, stored as a sorted pair so
/// `Link::new(a, b) == Link::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "LinkWire")]
pub struct Link {
    a: NoteId,
    b: NoteId,
}

#[derive(Deserialize)]
struct LinkWire {
    a: NoteId,
    b: NoteId,
}

impl From<LinkWire> for Link {
    fn from(wire: LinkWire) -> Self {
        Link::new(wire.a, wire.b)
    }
}

impl Link {
    #[must_use]
    pub fn new(a: NoteId, b: NoteId) -> Self {
        if a <= b { Self { a, b } } else { Self { a: b, b: a } }
    }

    #[must_use]
    pub fn touches(&self, note_id: &NoteId) -> bool {
        &self.a == note_id || &self.b == note_id
    }

    #[must_use]
    pub fn ends(&self) -> (&NoteId, &NoteId) {
        (&self.a, &self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasState {
    pub notes: BTreeMap<NoteId, Note>,
    pub links: BTreeSet<Link>,
}

/// Logical timestamp of a canvas snapshot. Field order gives the ordering:
/// time first, then peer id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub at: Millis,
    pub by: PeerId,
}

/// `CanvasUpdated` payload: the full board plus its stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(flatten)]
    pub state: CanvasState,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq)]
struct Drag {
    note_id: NoteId,
    x: f64,
    y: f64,
}

// =============================================================================
// SYNC
// =============================================================================

pub struct CanvasSync {
    local: PeerId,
    state: CanvasState,
    last_applied: Option<Stamp>,
    drag: Option<Drag>,
}

impl CanvasSync {
    #[must_use]
    pub fn new(local: PeerId) -> Self {
        Self { local, state: CanvasState::default(), last_applied: None, drag: None }
    }

    #[must_use]
    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    #[must_use]
    pub fn last_applied(&self) -> Option<&Stamp> {
        self.last_applied.as_ref()
    }

    /// Position to render, including an in-progress drag.
    #[must_use]
    pub fn display_position(&self, note_id: &NoteId) -> Option<(f64, f64)> {
        if let Some(drag) = self.drag.as_ref().filter(|d| &d.note_id == note_id) {
            return Some((drag.x, drag.y));
        }
        self.state.notes.get(note_id).map(|n| (n.x, n.y))
    }

    #[must_use]
    pub fn is_linked(&self, a: &NoteId, b: &NoteId) -> bool {
        self.state.links.contains(&Link::new(a.clone(), b.clone()))
    }

    // -------------------------------------------------------------------------
    // Local mutations
    // -------------------------------------------------------------------------

    pub fn add_note(&mut self, text: &str, x: f64, y: f64, now: Millis) -> (NoteId, Message) {
        let note_id = NoteId::generate();
        let note = Note { note_id: note_id.clone(), text: text.to_owned(), x, y, created_by: self.local.clone() };
        self.state.notes.insert(note_id.clone(), note);
        (note_id, self.publish(now))
    }

    pub fn edit_note(&mut self, note_id: &NoteId, text: &str, now: Millis) -> Option<Message> {
        let note = self.state.notes.get_mut(note_id)?;
        if note.text == text {
            return None;
        }
        text.clone_into(&mut note.text);
        Some(self.publish(now))
    }

    pub fn move_note(&mut self, note_id: &NoteId, x: f64, y: f64, now: Millis) -> Option<Message> {
        let note = self.state.notes.get_mut(note_id)?;
        note.x = x;
        note.y = y;
        Some(self.publish(now))
    }

    /// Removes the note and every link touching it.
    pub fn remove_note(&mut self, note_id: &NoteId, now: Millis) -> Option<Message> {
        self.state.notes.remove(note_id)?;
        self.state.links.retain(|l| !l.touches(note_id));
        if self.drag.as_ref().is_some_and(|d| &d.note_id == note_id) {
            self.drag = None;
        }
        Some(self.publish(now))
    }

    /// Add the edge if absent, remove it if present. Self-links and links to
    /// missing notes are ignored.
    pub fn toggle_link(&mut self, a: &NoteId, b: &NoteId, now: Millis) -> Option<Message> {
        if a == b || !self.state.notes.contains_key(a) || !self.state.notes.contains_key(b) {
            return None;
        }
        let link = Link::new(a.clone(), b.clone());
        if !self.state.links.remove(&link) {
            self.state.links.insert(link);
        }
        Some(self.publish(now))
    }

    // -------------------------------------------------------------------------
    // Drag
    // -------------------------------------------------------------------------

    pub fn begin_drag(&mut self, note_id: &NoteId) -> bool {
        let Some(note) = self.state.notes.get(note_id) else {
            return false;
        };
        self.drag = Some(Drag { note_id: note_id.clone(), x: note.x, y: note.y });
        true
    }

    /// Pointer moved. Local only.
    pub fn drag_to(&mut self, x: f64, y: f64) -> bool {
        let Some(drag) = self.drag.as_mut() else {
            return false;
        };
        drag.x = x;
        drag.y = y;
        true
    }

    /// Pointer released: commit the final position with one broadcast.
    pub fn end_drag(&mut self, now: Millis) -> Option<Message> {
        let drag = self.drag.take()?;
        self.move_note(&drag.note_id, drag.x, drag.y, now)
    }

    // -------------------------------------------------------------------------
    // Remote
    // -------------------------------------------------------------------------

    /// Apply a remote snapshot if its stamp is not older than the last one
    /// applied. Returns `true` when the snapshot was taken.
    pub fn apply_remote(&mut self, snapshot: CanvasSnapshot) -> bool {
        if self.last_applied.as_ref().is_some_and(|last| snapshot.stamp < *last) {
            debug!(at = snapshot.stamp.at, by = %snapshot.stamp.by, "canvas: dropping older snapshot");
            return false;
        }
        if let Some(drag) = &self.drag {
            if !snapshot.state.notes.contains_key(&drag.note_id) {
                self.drag = None;
            }
        }
        self.state = snapshot.state;
        self.last_applied = Some(snapshot.stamp);
        true
    }

    /// Current board as a broadcastable snapshot carrying the last stamp.
    #[must_use]
    pub fn snapshot(&self) -> Option<CanvasSnapshot> {
        let stamp = self.last_applied.clone()?;
        Some(CanvasSnapshot { state: self.state.clone(), stamp })
    }

    /// Stamp local state strictly newer than anything applied so far, so our
    /// own edit always wins locally and on peers that saw the same history.
    fn publish(&mut self, now: Millis) -> Message {
        let at = match &self.last_applied {
            Some(last) if now <= last.at => last.at.saturating_add(1),
            _ => now,
        };
        let stamp = Stamp { at, by: self.local.clone() };
        self.last_applied = Some(stamp.clone());
        Message::CanvasUpdated(CanvasSnapshot { state: self.state.clone(), stamp })
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
