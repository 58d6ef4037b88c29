//! End-to-end protocol scenarios over a deterministic in-process network.
//!
//! Every broadcast goes through the real frame codec and is delivered to
//! every other connected peer in FIFO order, with a virtual clock.

use std::collections::VecDeque;
use std::sync::Arc;

use session::canvas::CanvasSnapshot;
use session::content::KeyedTask;
use session::join::{Admission, AdmissionPolicy};
use session::message::{Envelope, Message, PresenceAnnounce, TaskAnswered};
use session::moderation::LockReason;
use session::progress::ProgressState;
use session::types::Millis;
use session::{AnswerKey, Command, Event, Outcome, PeerId, PeerIdentity, PuzzleContent, Session, SessionConfig, SessionPeer, TaskId};

const CODE: &str = "CASE";

// =============================================================
// Harness
// =============================================================

struct Net {
    peers: Vec<SessionPeer>,
    connected: Vec<bool>,
    events: Vec<(usize, Event)>,
    broadcasts: Vec<(usize, Message)>,
    now: Millis,
}

fn content(tasks: usize) -> Arc<dyn PuzzleContent> {
    let tasks = (0..tasks)
        .map(|i| KeyedTask { id: task(i), answers: vec![format!("answer {i}")] })
        .collect();
    Arc::new(AnswerKey::new(tasks).expect("key"))
}

fn task(i: usize) -> TaskId {
    TaskId::new(format!("t{i}"))
}

fn answer(i: usize) -> Command {
    Command::Answer { task_id: task(i), answer: format!("answer {i}") }
}

fn wire(sender: &PeerId, message: Message) -> Envelope {
    let frame = Envelope::new(sender.clone(), CODE, message).to_frame().expect("to_frame");
    let mut frame = frames::decode_frame(&frames::encode_frame(&frame)).expect("decode");
    frame.from = Some(sender.to_string());
    Envelope::from_frame(frame).expect("from_frame")
}

impl Net {
    fn new() -> Self {
        Self { peers: Vec::new(), connected: Vec::new(), events: Vec::new(), broadcasts: Vec::new(), now: 1_000 }
    }

    fn session(tasks: usize) -> Session {
        Session::new(CODE, PeerId::new("host"), tasks)
    }

    fn add(&mut self, id: &str, tasks: usize, admission: AdmissionPolicy) -> usize {
        let config = SessionConfig::default().with_admission(admission);
        let identity = PeerIdentity::new(PeerId::new(id), id, "#F3A712");
        let peer = SessionPeer::new(identity, Self::session(tasks), &config, content(tasks));
        let index = self.peers.len();
        self.peers.push(peer);
        self.connected.push(true);

        let peer_id = PeerId::new(id);
        for other in 0..index {
            if !self.connected[other] {
                continue;
            }
            let other_id = self.peers[other].identity().peer_id.clone();
            let out = self.peers[other].member_joined(&peer_id, self.now);
            self.route(other, out);
            let out = self.peers[index].member_joined(&other_id, self.now);
            self.route(index, out);
        }
        let out = self.peers[index].start(self.now);
        self.route(index, out);
        index
    }

    fn host(&mut self, tasks: usize) -> usize {
        self.add("host", tasks, AdmissionPolicy::AutoApprove)
    }

    fn route(&mut self, from: usize, outcome: Outcome) {
        let mut queue: VecDeque<(usize, Outcome)> = VecDeque::from([(from, outcome)]);
        while let Some((source, Outcome { broadcast, events })) = queue.pop_front() {
            self.events
                .extend(events.into_iter().map(|e| (source, e)));
            let sender = self.peers[source].identity().peer_id.clone();
            for message in broadcast {
                self.broadcasts.push((source, message.clone()));
                for target in 0..self.peers.len() {
                    if target == source || !self.connected[target] {
                        continue;
                    }
                    let out = self.peers[target].handle_envelope(wire(&sender, message.clone()), self.now);
                    queue.push_back((target, out));
                }
            }
        }
    }

    fn command(&mut self, peer: usize, command: Command) {
        self.now += 1;
        let out = self.peers[peer].handle_command(command, self.now);
        self.route(peer, out);
    }

    /// Inject a raw message as if `peer` had broadcast it.
    fn inject(&mut self, peer: usize, message: Message) {
        self.route(peer, Outcome { broadcast: vec![message], events: Vec::new() });
    }

    fn advance(&mut self, ms: Millis) {
        self.now += ms;
        for peer in 0..self.peers.len() {
            if self.connected[peer] {
                let out = self.peers[peer].tick(self.now);
                self.route(peer, out);
            }
        }
    }

    fn disconnect(&mut self, peer: usize) {
        self.connected[peer] = false;
        let peer_id = self.peers[peer].identity().peer_id.clone();
        for other in 0..self.peers.len() {
            if self.connected[other] {
                let out = self.peers[other].member_left(&peer_id, self.now);
                self.route(other, out);
            }
        }
    }

    /// Bring a dropped peer back on a fresh link, keeping its state.
    fn reconnect(&mut self, peer: usize) {
        self.connected[peer] = true;
        let peer_id = self.peers[peer].identity().peer_id.clone();
        let mut members = Vec::new();
        for other in 0..self.peers.len() {
            if other == peer || !self.connected[other] {
                continue;
            }
            members.push(self.peers[other].identity().peer_id.clone());
            let out = self.peers[other].member_joined(&peer_id, self.now);
            self.route(other, out);
        }
        let out = self.peers[peer].reconnected(&members, self.now);
        self.route(peer, out);
    }

    fn join_requests_from(&self, peer: usize) -> usize {
        self.broadcasts
            .iter()
            .filter(|(p, m)| *p == peer && matches!(m, Message::JoinRequest(_)))
            .count()
    }

    fn state(&self, peer: usize) -> &ProgressState {
        self.peers[peer].progress().state()
    }

    fn member_ids(&self, peer: usize) -> Vec<String> {
        self.peers[peer]
            .effective_members(self.now)
            .into_iter()
            .map(|p| p.peer_id.to_string())
            .collect()
    }

    fn count_events(&self, peer: usize, wanted: impl Fn(&Event) -> bool) -> usize {
        self.events
            .iter()
            .filter(|(p, e)| *p == peer && wanted(e))
            .count()
    }

    fn progress_broadcasts(&self) -> usize {
        self.broadcasts
            .iter()
            .filter(|(_, m)| matches!(m, Message::ProgressUpdated(_)))
            .count()
    }
}

// =============================================================
// Scenarios
// =============================================================

#[test]
fn host_submission_reaches_every_peer() {
    let mut net = Net::new();
    let host = net.host(7);
    let bo = net.add("bo", 7, AdmissionPolicy::Prompt);
    let cy = net.add("cy", 7, AdmissionPolicy::Prompt);

    net.command(host, answer(0));

    for peer in [host, bo, cy] {
        let state = net.state(peer);
        assert_eq!(state.completed_task_ids, [task(0)].into_iter().collect(), "peer {peer}");
        assert_eq!(state.current_task_index, 1, "peer {peer}");
    }
}

#[test]
fn guest_proposal_is_merged_once() {
    let mut net = Net::new();
    let host = net.host(7);
    let bo = net.add("bo", 7, AdmissionPolicy::Prompt);
    let before = net.progress_broadcasts();

    net.command(bo, answer(0));
    assert_eq!(net.state(host).completed_task_ids, [task(0)].into_iter().collect());
    assert_eq!(net.state(bo), net.state(host));
    assert_eq!(net.progress_broadcasts(), before + 1);

    let proposal = Message::TaskAnswered(TaskAnswered { peer_id: PeerId::new("bo"), task_id: task(0) });
    net.inject(bo, proposal);
    assert_eq!(net.progress_broadcasts(), before + 1);
    assert_eq!(net.state(host).clock, 1);
}

#[test]
fn late_joiner_catches_up() {
    let mut net = Net::new();
    let host = net.host(7);
    for i in 0..3 {
        net.command(host, answer(i));
    }

    let late = net.add("late", 7, AdmissionPolicy::Prompt);
    assert!(net.peers[late].is_admitted());
    assert_eq!(net.state(late).completed_task_ids.len(), 3);
    assert_eq!(net.state(late), net.state(host));
}

#[test]
fn kicked_peer_disappears_everywhere_else() {
    let mut net = Net::new();
    let host = net.host(7);
    let x = net.add("x", 7, AdmissionPolicy::Prompt);
    let y = net.add("y", 7, AdmissionPolicy::Prompt);
    assert_eq!(net.member_ids(y), vec!["host", "x", "y"]);

    net.command(host, Command::Kick(PeerId::new("x")));

    assert_eq!(net.member_ids(host), vec!["host", "y"]);
    assert_eq!(net.member_ids(y), vec!["host", "y"]);
    assert_eq!(net.peers[x].locked(), Some(LockReason::Kicked));
}

#[test]
fn reset_clears_progress_on_every_peer() {
    let mut net = Net::new();
    let host = net.host(7);
    let bo = net.add("bo", 7, AdmissionPolicy::Prompt);
    let cy = net.add("cy", 7, AdmissionPolicy::Prompt);
    for i in 0..5 {
        net.command(if i % 2 == 0 { host } else { bo }, answer(i));
    }
    assert_eq!(net.state(cy).completed_task_ids.len(), 5);

    net.command(host, Command::Reset);

    for peer in [host, bo, cy] {
        let state = net.state(peer);
        assert_eq!(state.current_task_index, 0, "peer {peer}");
        assert!(state.completed_task_ids.is_empty(), "peer {peer}");
        assert!(!state.hint_used_for_current, "peer {peer}");
    }
    assert_eq!(net.count_events(bo, |e| *e == Event::Reset), 1);
}

// =============================================================
// Properties
// =============================================================

#[test]
fn completed_set_only_shrinks_on_reset() {
    let mut net = Net::new();
    let host = net.host(6);
    let bo = net.add("bo", 6, AdmissionPolicy::Prompt);
    let steps = [(bo, 2), (host, 0), (bo, 2), (host, 5), (bo, 1), (host, 1), (bo, 4), (host, 3)];

    let mut last = [0usize; 2];
    for (peer, task_index) in steps {
        net.command(peer, answer(task_index));
        for (slot, p) in [host, bo].into_iter().enumerate() {
            let len = net.state(p).completed_task_ids.len();
            assert!(len >= last[slot], "completed set shrank on peer {p}");
            last[slot] = len;
        }
    }
    assert_eq!(last, [6, 6]);
    assert_eq!(net.count_events(bo, |e| matches!(e, Event::SessionComplete(_))), 1);
    assert_eq!(net.count_events(host, |e| matches!(e, Event::SessionComplete(_))), 1);
}

#[test]
fn repeated_proposal_inserts_once() {
    let mut net = Net::new();
    let _host = net.host(3);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    let before = net.progress_broadcasts();

    let proposal = Message::TaskAnswered(TaskAnswered { peer_id: PeerId::new("bo"), task_id: task(1) });
    for _ in 0..5 {
        net.inject(bo, proposal.clone());
    }
    assert_eq!(net.state(bo).completed_task_ids, [task(1)].into_iter().collect());
    assert_eq!(net.progress_broadcasts(), before + 1);
}

#[test]
fn canvas_converges_on_highest_stamp_in_any_order() {
    let mut net = Net::new();
    let host = net.host(3);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    let cy = net.add("cy", 3, AdmissionPolicy::Prompt);

    net.command(host, Command::AddNote { text: "first".into(), x: 0.0, y: 0.0 });
    net.command(bo, Command::AddNote { text: "second".into(), x: 1.0, y: 1.0 });
    net.command(cy, Command::AddNote { text: "third".into(), x: 2.0, y: 2.0 });

    let snapshots: Vec<CanvasSnapshot> = net
        .broadcasts
        .iter()
        .filter_map(|(_, m)| match m {
            Message::CanvasUpdated(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    let newest = snapshots
        .iter()
        .max_by(|a, b| a.stamp.cmp(&b.stamp))
        .expect("snapshots")
        .clone();
    assert_eq!(newest.state.notes.len(), 3);

    for peer in [host, bo, cy] {
        assert_eq!(net.peers[peer].canvas().state(), &newest.state, "peer {peer}");
    }

    // A fresh observer receiving them newest-first converges on the same board.
    let mut observer = session::canvas::CanvasSync::new(PeerId::new("observer"));
    for snapshot in snapshots.into_iter().rev() {
        observer.apply_remote(snapshot);
    }
    assert_eq!(observer.state(), &newest.state);
}

#[test]
fn silent_host_means_exactly_one_self_admission() {
    let mut net = Net::new();
    // No host on the channel at all.
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    net.advance(4_999);
    assert!(!net.peers[bo].is_admitted());
    net.advance(1);
    net.advance(10_000);

    assert_eq!(net.count_events(bo, |e| *e == Event::Admitted(Admission::Timeout)), 1);
    assert_eq!(net.count_events(bo, |e| matches!(e, Event::Locked(_))), 0);
}

#[test]
fn kicked_peer_cannot_announce_its_way_back() {
    let mut net = Net::new();
    let host = net.host(3);
    let x = net.add("x", 3, AdmissionPolicy::Prompt);
    let y = net.add("y", 3, AdmissionPolicy::Prompt);
    net.command(host, Command::Kick(PeerId::new("x")));

    let announce = Message::PresenceAnnounce(PresenceAnnounce { display_name: "x again".into(), color_tag: String::new() });
    net.inject(x, announce);
    assert!(!net.member_ids(y).contains(&"x".to_owned()));
    assert!(!net.member_ids(host).contains(&"x".to_owned()));
}

#[test]
fn forged_host_messages_are_rejected() {
    let mut net = Net::new();
    let host = net.host(3);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    let mallory = net.add("mallory", 3, AdmissionPolicy::Prompt);

    let forged = ProgressState {
        current_task_index: 3,
        completed_task_ids: (0..3).map(task).collect(),
        clock: 1_000,
        ..ProgressState::default()
    };
    net.inject(mallory, Message::ProgressUpdated(forged));
    net.inject(mallory, Message::PlayerKicked(session::message::PeerTarget { peer_id: PeerId::new("bo") }));

    assert!(net.state(bo).completed_task_ids.is_empty());
    assert!(net.state(host).completed_task_ids.is_empty());
    assert_eq!(net.peers[bo].locked(), None);
}

#[test]
fn guests_keep_last_progress_when_host_drops() {
    let mut net = Net::new();
    let host = net.host(3);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    net.command(host, answer(0));
    net.disconnect(host);

    assert!(!net.member_ids(bo).contains(&"host".to_owned()));
    assert_eq!(net.state(bo).completed_task_ids.len(), 1);
    // Proposals go nowhere; mirror state stays canonical-only.
    net.command(bo, answer(1));
    assert_eq!(net.state(bo).completed_task_ids.len(), 1);
}

#[test]
fn silent_peers_go_stale_and_return_on_traffic() {
    let mut net = Net::new();
    let host = net.host(3);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);

    // Both keep heartbeating while connected.
    for _ in 0..6 {
        net.advance(10_000);
    }
    assert_eq!(net.member_ids(host), vec!["bo", "host"]);

    // Simulate a silent-but-subscribed peer: bo stops ticking.
    net.connected[bo] = false;
    for _ in 0..4 {
        net.advance(10_000);
    }
    assert_eq!(net.member_ids(host), vec!["host"]);

    net.connected[bo] = true;
    net.advance(10_000);
    assert_eq!(net.member_ids(host), vec!["bo", "host"]);
}

#[test]
fn late_deny_keeps_every_board_identical() {
    let mut net = Net::new();
    let host = net.add("host", 3, AdmissionPolicy::Prompt);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    let dx = net.add("dx", 3, AdmissionPolicy::Prompt);
    // Nobody answers: both guests let themselves in.
    net.advance(5_000);
    assert!(net.peers[dx].is_admitted());

    net.command(host, Command::Deny(PeerId::new("dx")));
    net.command(dx, Command::AddNote { text: "planted".into(), x: 1.0, y: 1.0 });
    assert!(net.peers[host].canvas().state().notes.is_empty());
    assert!(net.peers[bo].canvas().state().notes.is_empty());

    // A later honest edit must not carry the denied note along.
    net.command(bo, Command::AddNote { text: "alibi".into(), x: 2.0, y: 2.0 });
    assert_eq!(net.peers[host].canvas().state(), net.peers[bo].canvas().state());
    assert_eq!(net.peers[host].canvas().state().notes.len(), 1);

    // Late joiners get the same board from the host.
    let cy = net.add("cy", 3, AdmissionPolicy::Prompt);
    net.command(host, Command::Approve(PeerId::new("cy")));
    assert_eq!(net.peers[cy].canvas().state(), net.peers[host].canvas().state());
}

#[test]
fn reconnecting_guest_asks_to_join_only_once() {
    let mut net = Net::new();
    let host = net.add("host", 3, AdmissionPolicy::Prompt);
    let bo = net.add("bo", 3, AdmissionPolicy::Prompt);
    assert_eq!(net.join_requests_from(bo), 1);

    net.disconnect(bo);
    net.advance(1_000);
    net.reconnect(bo);
    assert_eq!(net.join_requests_from(bo), 1);
    assert!(net.member_ids(host).contains(&"bo".to_owned()));

    // The host still answers the original request.
    net.command(host, Command::Approve(PeerId::new("bo")));
    assert_eq!(net.count_events(bo, |e| *e == Event::Admitted(Admission::Host)), 1);
}
