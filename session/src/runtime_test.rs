use super::*;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::content::{AnswerKey, KeyedTask, LogSummarySink, SessionSummary};
use crate::join::{Admission, AdmissionPolicy};
use crate::transport::{MemoryHub, Transport};
use crate::types::{PeerId, TaskId};

const CODE: &str = "ROOM";

#[derive(Default)]
struct RecordingSink {
    summaries: Mutex<Vec<SessionSummary>>,
}

#[async_trait::async_trait]
impl SummarySink for RecordingSink {
    async fn record(&self, summary: &SessionSummary) {
        self.summaries.lock().await.push(summary.clone());
    }
}

fn config(admission: AdmissionPolicy) -> SessionConfig {
    SessionConfig {
        heartbeat_interval: Duration::from_millis(200),
        stale_after: Duration::from_millis(2_000),
        join_timeout: Duration::from_millis(800),
        catch_up_timeout: Duration::from_millis(200),
        catch_up_attempts: 3,
        tick: Duration::from_millis(10),
        command_queue_capacity: 64,
        reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(20),
        admission,
    }
}

fn shared(hub: &MemoryHub) -> Arc<dyn Transport> {
    Arc::new(hub.clone())
}

fn options(id: &str, admission: AdmissionPolicy, sink: Arc<dyn SummarySink>) -> SessionOptions {
    let key = AnswerKey::new(vec![
        KeyedTask { id: TaskId::new("t0"), answers: vec!["alpha".into()] },
        KeyedTask { id: TaskId::new("t1"), answers: vec!["beta".into()] },
    ])
    .expect("key");
    SessionOptions {
        identity: PeerIdentity::new(PeerId::new(id), id, "#2A9D8F"),
        session_code: CODE.into(),
        content: Arc::new(key),
        config: config(admission),
        sink,
    }
}

async fn wait_for(handle: &mut SessionHandle, wanted: impl Fn(&Event) -> bool) -> Event {
    timeout(Duration::from_secs(3), async {
        loop {
            match handle.next_event().await {
                Some(event) if wanted(&event) => return event,
                Some(_) => {}
                None => panic!("session ended before the expected event"),
            }
        }
    })
    .await
    .expect("event in time")
}

fn answer(task: &str, text: &str) -> Command {
    Command::Answer { task_id: TaskId::new(task), answer: text.into() }
}

#[tokio::test]
async fn guest_joins_solves_and_host_records_summary() {
    let hub = MemoryHub::new();
    let sink = Arc::new(RecordingSink::default());
    let mut host = host_session(shared(&hub), options("host", AdmissionPolicy::AutoApprove, sink.clone()))
        .await
        .expect("host");
    let mut guest = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("guest");

    let admitted = wait_for(&mut guest, |e| matches!(e, Event::Admitted(_))).await;
    assert_eq!(admitted, Event::Admitted(Admission::Host));

    guest.send(answer("t0", "alpha")).await.expect("send");
    wait_for(&mut host, |e| matches!(e, Event::ProgressChanged(s) if s.completed_task_ids.len() == 1)).await;
    host.send(answer("t1", "beta")).await.expect("send");

    wait_for(&mut guest, |e| matches!(e, Event::SessionComplete(_))).await;
    wait_for(&mut host, |e| matches!(e, Event::SessionComplete(_))).await;

    let summaries = sink.summaries.lock().await.clone();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].solved_by.get(&TaskId::new("t0")), Some(&PeerId::new("bo")));
    assert_eq!(summaries[0].solved_by.get(&TaskId::new("t1")), Some(&PeerId::new("host")));

    assert_eq!(guest.leave().await.expect("leave"), SessionExit::Left);
    assert_eq!(host.leave().await.expect("leave"), SessionExit::Left);
}

#[tokio::test]
async fn silent_host_lets_guest_in_after_timeout() {
    let hub = MemoryHub::new();
    let mut host = host_session(shared(&hub), options("host", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("host");
    let mut guest = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("guest");

    wait_for(&mut host, |e| matches!(e, Event::JoinPrompt { .. })).await;
    let admitted = wait_for(&mut guest, |e| matches!(e, Event::Admitted(_))).await;
    assert_eq!(admitted, Event::Admitted(Admission::Timeout));

    guest.leave().await.expect("leave");
    host.leave().await.expect("leave");
}

#[tokio::test]
async fn denied_guest_task_ends_locked() {
    let hub = MemoryHub::new();
    let mut host = host_session(shared(&hub), options("host", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("host");
    let mut guest = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("guest");

    wait_for(&mut host, |e| matches!(e, Event::JoinPrompt { .. })).await;
    host.send(Command::Deny(PeerId::new("bo"))).await.expect("send");
    wait_for(&mut guest, |e| matches!(e, Event::Locked(_))).await;
    assert_eq!(guest.finished().await.expect("exit"), SessionExit::Locked(LockReason::Denied));

    host.leave().await.expect("leave");
}

#[tokio::test]
async fn joining_a_missing_session_fails() {
    let hub = MemoryHub::new();
    let result = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink))).await;
    assert!(matches!(result, Err(SessionError::Transport(TransportError::SessionNotFound(_)))));
}

#[tokio::test]
async fn transport_close_ends_the_task_without_reconnects() {
    let hub = MemoryHub::new();
    let mut opts = options("host", AdmissionPolicy::Prompt, Arc::new(LogSummarySink));
    opts.config.reconnect_attempts = 0;
    let host = host_session(shared(&hub), opts).await.expect("host");
    hub.disconnect(CODE, &PeerId::new("host")).await;
    let exit = timeout(Duration::from_secs(3), host.finished()).await.expect("in time");
    assert_eq!(exit.expect("exit"), SessionExit::Disconnected);
}

#[tokio::test]
async fn guest_reconnect_does_not_ask_to_join_again() {
    let hub = MemoryHub::new();
    let mut host = host_session(shared(&hub), options("host", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("host");
    let watch = ConnectRequest { session_code: CODE.into(), peer_id: PeerId::new("watch"), open: None };
    let mut watcher = hub.connect(watch).await.expect("watcher");
    let mut guest = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("guest");
    wait_for(&mut host, |e| matches!(e, Event::JoinPrompt { .. })).await;

    hub.disconnect(CODE, &PeerId::new("bo")).await;

    let (mut announces, mut requests) = (0, 0);
    timeout(Duration::from_secs(3), async {
        while announces < 2 {
            match watcher.inbound.recv().await {
                Some(TransportEvent::Frame(frame)) if frame.from.as_deref() == Some("bo") => match frame.syscall.as_str() {
                    "presence:announce" => announces += 1,
                    "join:request" => requests += 1,
                    _ => {}
                },
                Some(_) => {}
                None => panic!("watcher link closed"),
            }
        }
    })
    .await
    .expect("guest announced again after reconnecting");
    assert_eq!(requests, 1);
    assert!(hub.members(CODE).await.contains(&PeerId::new("bo")));

    // The original request is still the one the host answers.
    host.send(Command::Approve(PeerId::new("bo"))).await.expect("send");
    wait_for(&mut guest, |e| matches!(e, Event::Admitted(_))).await;

    guest.leave().await.expect("leave");
    host.leave().await.expect("leave");
}

#[tokio::test]
async fn guest_gives_up_when_the_session_is_gone() {
    let hub = MemoryHub::new();
    let host = host_session(shared(&hub), options("host", AdmissionPolicy::AutoApprove, Arc::new(LogSummarySink)))
        .await
        .expect("host");
    let guest = join_session(shared(&hub), options("bo", AdmissionPolicy::Prompt, Arc::new(LogSummarySink)))
        .await
        .expect("guest");

    assert_eq!(host.leave().await.expect("leave"), SessionExit::Left);
    timeout(Duration::from_secs(3), async {
        while hub.members(CODE).await != vec![PeerId::new("bo")] {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("host left the hub");
    // Last one out: the hub evicts the session, so there is nothing to rejoin.
    hub.disconnect(CODE, &PeerId::new("bo")).await;
    let exit = timeout(Duration::from_secs(3), guest.finished()).await.expect("in time");
    assert_eq!(exit.expect("exit"), SessionExit::Disconnected);
}
