//! Moderation — host-only commands that change who participates.
//!
//! `kick` is final for the session: every peer filters the target out of
//! effective membership, and the target locks itself. `reset` delegates to
//! the progress coordinator and never touches the canvas or the kicked set.
//!
//! Every peer also records the targets of `JoinDenied`. Kicked and denied
//! peers are excluded the same way on the host and on guests, so the canvas
//! filter gives every peer the same board.

use std::collections::BTreeSet;

use crate::message::{Message, PeerTarget};
use crate::progress::{ProgressCoordinator, ProgressOutcome};
use crate::types::PeerId;

/// Why a peer was forced out. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Denied,
    Kicked,
}

/// Effect of observing a `PlayerKicked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KickEffect {
    /// Someone else left effective membership.
    Removed(PeerId),
    /// We were the target and are now locked.
    SelfLocked,
}

pub struct Moderation {
    local: PeerId,
    host: PeerId,
    kicked: BTreeSet<PeerId>,
    denied: BTreeSet<PeerId>,
    locked: Option<LockReason>,
}

impl Moderation {
    #[must_use]
    pub fn new(local: PeerId, host: PeerId) -> Self {
        Self { local, host, kicked: BTreeSet::new(), denied: BTreeSet::new(), locked: None }
    }

    fn is_host(&self) -> bool {
        self.local == self.host
    }

    #[must_use]
    pub fn kicked(&self) -> &BTreeSet<PeerId> {
        &self.kicked
    }

    #[must_use]
    pub fn is_kicked(&self, peer_id: &PeerId) -> bool {
        self.kicked.contains(peer_id)
    }

    /// Kicked or denied: this peer's proposals and canvas snapshots are
    /// dropped.
    #[must_use]
    pub fn is_excluded(&self, peer_id: &PeerId) -> bool {
        self.kicked.contains(peer_id) || self.denied.contains(peer_id)
    }

    /// A `JoinDenied` was issued or observed. Returns false if already known.
    pub fn on_denied(&mut self, target: &PeerId) -> bool {
        target != &self.host && self.denied.insert(target.clone())
    }

    #[must_use]
    pub fn locked(&self) -> Option<LockReason> {
        self.locked
    }

    /// Host issues a kick. The host cannot kick itself, and kicking twice is
    /// a no-op.
    pub fn kick(&mut self, target: &PeerId) -> Option<Message> {
        if !self.is_host() || target == &self.host || !self.kicked.insert(target.clone()) {
            return None;
        }
        Some(Message::PlayerKicked(PeerTarget { peer_id: target.clone() }))
    }

    /// A `PlayerKicked` arrived (sender already verified as host).
    pub fn on_kicked(&mut self, target: &PeerId) -> Option<KickEffect> {
        if !self.kicked.insert(target.clone()) {
            return None;
        }
        if target == &self.local {
            self.lock(LockReason::Kicked);
            return Some(KickEffect::SelfLocked);
        }
        Some(KickEffect::Removed(target.clone()))
    }

    /// Enter a terminal state. The first reason sticks.
    pub fn lock(&mut self, reason: LockReason) -> bool {
        if self.locked.is_some() {
            return false;
        }
        self.locked = Some(reason);
        true
    }

    /// Host-only reset of puzzle progress. Completion flags are cleared by the
    /// coordinator; canvas and kicks are untouched.
    pub fn reset(&self, progress: &mut ProgressCoordinator) -> ProgressOutcome {
        if !self.is_host() {
            return ProgressOutcome::default();
        }
        progress.reset()
    }
}

#[cfg(test)]
#[path = "moderation_test.rs"]
mod tests;
