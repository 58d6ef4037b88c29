//! Join gate — host consent before a guest may propose progress.
//!
//! DESIGN
//! ======
//! Guest side (`JoinGate`): `Idle -> Pending -> Approved | Denied`, one
//! transition out of `Pending`, ever. Entering `Pending` emits exactly one
//! `JoinRequest`. The runtime keeps the same peer, and so the same gate,
//! when it re-attaches after a transport drop, so a reconnect never re-sends
//! it.
//!
//! Host side (`AdmissionDesk`): one record per requesting peer. Decisions
//! are final. A repeated request from a decided peer is answered with the
//! same decision again, which heals a guest that missed the first reply.
//!
//! TRADE-OFFS
//! ==========
//! A guest that hears nothing within the join timeout admits itself. Being
//! admitted only grants the right to *propose*; the host's coordinator is
//! still the only writer of canonical progress. A late `JoinDenied` after a
//! timeout admission is ignored by the guest, but every peer records the
//! denial and drops that peer's proposals and canvas snapshots.

use std::collections::BTreeMap;

use crate::message::{JoinRequest, Message, PeerTarget};
use crate::types::{Millis, PeerId};

// =============================================================================
// GUEST SIDE
// =============================================================================

/// How a guest got in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The host explicitly approved.
    Host,
    /// Nobody answered in time.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    Pending { since: Millis },
    Approved(Admission),
    Denied,
}

/// Transition produced by the gate; each fires at most once per gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTransition {
    Approved(Admission),
    Denied,
}

pub struct JoinGate {
    local: PeerId,
    state: JoinState,
    timeout_ms: Millis,
}

impl JoinGate {
    #[must_use]
    pub fn new(local: PeerId, timeout_ms: Millis) -> Self {
        Self { local, state: JoinState::Idle, timeout_ms }
    }

    #[must_use]
    pub fn state(&self) -> JoinState {
        self.state
    }

    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self.state, JoinState::Approved(_))
    }

    /// Enter `Pending` and produce the one `JoinRequest`. Later calls are no-ops.
    pub fn begin(&mut self, display_name: &str, now: Millis) -> Option<Message> {
        if self.state != JoinState::Idle {
            return None;
        }
        self.state = JoinState::Pending { since: now };
        Some(Message::JoinRequest(JoinRequest { display_name: display_name.to_owned() }))
    }

    /// Host approved someone. Only matters when it is us and we are pending.
    pub fn on_approved(&mut self, target: &PeerId) -> Option<JoinTransition> {
        self.resolve(target, JoinState::Approved(Admission::Host))
    }

    /// Host declined someone.
    pub fn on_denied(&mut self, target: &PeerId) -> Option<JoinTransition> {
        self.resolve(target, JoinState::Denied)
    }

    /// Liveness fallback: admit ourselves once the timeout has passed.
    pub fn poll(&mut self, now: Millis) -> Option<JoinTransition> {
        let JoinState::Pending { since } = self.state else {
            return None;
        };
        if now.saturating_sub(since) < self.timeout_ms {
            return None;
        }
        self.state = JoinState::Approved(Admission::Timeout);
        Some(JoinTransition::Approved(Admission::Timeout))
    }

    fn resolve(&mut self, target: &PeerId, next: JoinState) -> Option<JoinTransition> {
        if target != &self.local || !matches!(self.state, JoinState::Pending { .. }) {
            return None;
        }
        self.state = next;
        match next {
            JoinState::Approved(via) => Some(JoinTransition::Approved(via)),
            JoinState::Denied => Some(JoinTransition::Denied),
            JoinState::Idle | JoinState::Pending { .. } => None,
        }
    }
}

// =============================================================================
// HOST SIDE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Surface every request to the host for a decision.
    #[default]
    Prompt,
    /// Approve every request immediately.
    AutoApprove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRecord {
    pub display_name: String,
    pub decision: Decision,
}

/// What the host should do with an incoming `JoinRequest`.
#[derive(Debug, Clone, PartialEq)]
pub enum DeskOutcome {
    /// Ask the human host to accept or decline.
    Prompt { peer_id: PeerId, display_name: String },
    /// Broadcast this decision.
    Reply(Message),
    /// Request already awaiting a decision.
    Nothing,
}

pub struct AdmissionDesk {
    records: BTreeMap<PeerId, AdmissionRecord>,
    policy: AdmissionPolicy,
}

impl AdmissionDesk {
    #[must_use]
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self { records: BTreeMap::new(), policy }
    }

    pub fn on_request(&mut self, peer_id: &PeerId, display_name: &str) -> DeskOutcome {
        if let Some(record) = self.records.get_mut(peer_id) {
            record.display_name = display_name.to_owned();
            return match record.decision {
                Decision::Pending => DeskOutcome::Nothing,
                Decision::Approved => DeskOutcome::Reply(approved(peer_id)),
                Decision::Denied => DeskOutcome::Reply(denied(peer_id)),
            };
        }

        let decision = match self.policy {
            AdmissionPolicy::Prompt => Decision::Pending,
            AdmissionPolicy::AutoApprove => Decision::Approved,
        };
        self.records
            .insert(peer_id.clone(), AdmissionRecord { display_name: display_name.to_owned(), decision });
        match decision {
            Decision::Approved => DeskOutcome::Reply(approved(peer_id)),
            Decision::Pending | Decision::Denied => {
                DeskOutcome::Prompt { peer_id: peer_id.clone(), display_name: display_name.to_owned() }
            }
        }
    }

    /// Accept a pending (or not yet heard) peer. Final decisions do not flip.
    pub fn approve(&mut self, peer_id: &PeerId) -> Option<Message> {
        self.decide(peer_id, Decision::Approved).then(|| approved(peer_id))
    }

    /// Decline a pending (or not yet heard) peer. Approved peers are removed
    /// with a kick instead.
    pub fn deny(&mut self, peer_id: &PeerId) -> Option<Message> {
        self.decide(peer_id, Decision::Denied).then(|| denied(peer_id))
    }

    fn decide(&mut self, peer_id: &PeerId, decision: Decision) -> bool {
        let record = self
            .records
            .entry(peer_id.clone())
            .or_insert_with(|| AdmissionRecord { display_name: String::new(), decision: Decision::Pending });
        if record.decision != Decision::Pending {
            return false;
        }
        record.decision = decision;
        true
    }

    #[must_use]
    pub fn decision(&self, peer_id: &PeerId) -> Option<Decision> {
        self.records.get(peer_id).map(|r| r.decision)
    }

    /// Requests still waiting on the host, sorted by peer id.
    #[must_use]
    pub fn pending(&self) -> Vec<(PeerId, String)> {
        self.records
            .iter()
            .filter(|(_, r)| r.decision == Decision::Pending)
            .map(|(id, r)| (id.clone(), r.display_name.clone()))
            .collect()
    }
}

fn approved(peer_id: &PeerId) -> Message {
    Message::JoinApproved(PeerTarget { peer_id: peer_id.clone() })
}

fn denied(peer_id: &PeerId) -> Message {
    Message::JoinDenied(PeerTarget { peer_id: peer_id.clone() })
}

#[cfg(test)]
#[path = "join_test.rs"]
mod tests;
