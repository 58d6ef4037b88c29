//! Presence registry — who is on the session channel right now.
//!
//! DESIGN
//! ======
//! There is no central registry. Every peer rebuilds its own from two feeds:
//! - application announces/heartbeats (carry display name and color)
//! - the transport's ephemeral membership feed (join/leave notifications)
//!
//! Announce-sourced fields win for name and color; either feed refreshes
//! liveness. A transport leave hides the peer at once, and silence longer
//! than `stale_after` hides it too. Entries are never deleted while the
//! session is open, so a returning peer keeps its name.
//!
//! Kicked peers are filtered by the caller's kicked set, so an announce from
//! a kicked id can never bring it back.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Millis, PeerId, PeerIdentity, UNNAMED};

/// A peer as shown to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub peer_id: PeerId,
    pub display_name: String,
    pub color_tag: String,
    pub last_seen_at: Millis,
}

impl Peer {
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() { UNNAMED } else { &self.display_name }
    }
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    peer: Peer,
    /// Set once an announce has supplied name and color.
    announced: bool,
    /// Transport reported the peer gone and nothing has revived it since.
    departed: bool,
}

impl PresenceEntry {
    fn unannounced(peer_id: PeerId, now: Millis) -> Self {
        Self {
            peer: Peer { peer_id, display_name: String::new(), color_tag: String::new(), last_seen_at: now },
            announced: false,
            departed: false,
        }
    }

    fn touch(&mut self, now: Millis) {
        self.peer.last_seen_at = self.peer.last_seen_at.max(now);
        self.departed = false;
    }
}

pub struct PresenceRegistry {
    entries: BTreeMap<PeerId, PresenceEntry>,
    stale_after_ms: Millis,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(stale_after_ms: Millis) -> Self {
        Self { entries: BTreeMap::new(), stale_after_ms }
    }

    /// Idempotent upsert from a `PresenceAnnounce`. Always takes the latest
    /// name and color. Returns `true` when anything visible changed.
    pub fn announce(&mut self, identity: &PeerIdentity, now: Millis) -> bool {
        let entry = self
            .entries
            .entry(identity.peer_id.clone())
            .or_insert_with(|| PresenceEntry::unannounced(identity.peer_id.clone(), now));
        let was_visible = !entry.departed;
        let changed = !entry.announced
            || entry.peer.display_name != identity.display_name
            || entry.peer.color_tag != identity.color_tag;

        entry.peer.display_name.clone_from(&identity.display_name);
        entry.peer.color_tag.clone_from(&identity.color_tag);
        entry.announced = true;
        entry.touch(now);
        changed || !was_visible
    }

    /// Refresh `last_seen_at`. Unknown peers get a nameless entry, since any
    /// traffic proves the peer is on the channel. Returns `true` for a newly
    /// seen or revived peer.
    pub fn heartbeat(&mut self, peer_id: &PeerId, now: Millis) -> bool {
        self.touch(peer_id, now)
    }

    /// Transport membership feed: peer subscribed.
    pub fn transport_joined(&mut self, peer_id: &PeerId, now: Millis) -> bool {
        self.touch(peer_id, now)
    }

    /// Transport membership feed: peer unsubscribed. Returns `true` when the
    /// peer was visible before.
    pub fn transport_left(&mut self, peer_id: &PeerId) -> bool {
        let Some(entry) = self.entries.get_mut(peer_id) else {
            return false;
        };
        let was_visible = !entry.departed;
        entry.departed = true;
        was_visible
    }

    fn touch(&mut self, peer_id: &PeerId, now: Millis) -> bool {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                let revived = entry.departed;
                entry.touch(now);
                revived
            }
            None => {
                self.entries
                    .insert(peer_id.clone(), PresenceEntry::unannounced(peer_id.clone(), now));
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.entries.get(peer_id).map(|e| &e.peer)
    }

    /// Whether the peer has been heard from recently and has not left.
    #[must_use]
    pub fn is_live(&self, peer_id: &PeerId, now: Millis) -> bool {
        self.entries
            .get(peer_id)
            .is_some_and(|e| self.entry_is_live(e, now))
    }

    fn entry_is_live(&self, entry: &PresenceEntry, now: Millis) -> bool {
        !entry.departed && now.saturating_sub(entry.peer.last_seen_at) <= self.stale_after_ms
    }

    /// Peers shown to humans: known, live, and not kicked. Sorted by peer id.
    #[must_use]
    pub fn effective_members(&self, kicked: &BTreeSet<PeerId>, now: Millis) -> Vec<Peer> {
        self.entries
            .values()
            .filter(|e| !kicked.contains(&e.peer.peer_id) && self.entry_is_live(e, now))
            .map(|e| e.peer.clone())
            .collect()
    }

    /// Known peers that have gone quiet without a transport leave.
    #[must_use]
    pub fn stale_peers(&self, now: Millis) -> Vec<PeerId> {
        self.entries
            .values()
            .filter(|e| !e.departed && !self.entry_is_live(e, now))
            .map(|e| e.peer.peer_id.clone())
            .collect()
    }

    /// Every peer ever seen in this session, including departed ones.
    #[must_use]
    pub fn known(&self) -> Vec<PeerId> {
        self.entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
