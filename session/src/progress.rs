//! Progress coordinator — the single source of truth for puzzle completion.
//!
//! ARCHITECTURE
//! ============
//! The host runs the coordinator in `Host` role and is the only writer of
//! canonical `ProgressState`. Every guest runs it in `Mirror` role: it
//! replaces its copy wholesale from each `ProgressUpdated` and never merges.
//! Guests only *propose* (`TaskAnswered`, `HintRequested`); the host validates
//! and rebroadcasts.
//!
//! INVARIANTS
//! ==========
//! - `completed_task_ids` never shrinks except through `reset`.
//! - `current_task_index == completed_task_ids.len()` after every mutation.
//! - `clock` strictly increases with every canonical mutation, reset
//!   included, so mirrors drop snapshots older than the one they hold.
//! - Completion fires once per transition into "all tasks done".

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::PuzzleContent;
use crate::message::{GameReset, Message, TaskAnswered};
use crate::types::{Millis, PeerId, TaskId};

// =============================================================================
// STATE
// =============================================================================

/// Canonical progress. Also the `ProgressUpdated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub current_task_index: usize,
    pub completed_task_ids: BTreeSet<TaskId>,
    pub hint_used_for_current: bool,
    /// Logical clock of the last canonical mutation.
    pub clock: u64,
    /// Who solved each task, for the completion summary.
    #[serde(default)]
    pub solved_by: BTreeMap<TaskId, PeerId>,
}

impl ProgressState {
    fn initial(clock: u64) -> Self {
        Self { clock, ..Self::default() }
    }
}

/// What one coordinator call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressOutcome {
    /// Messages for the session channel, in order.
    pub broadcast: Vec<Message>,
    /// Local state differs from before the call.
    pub changed: bool,
    /// Edge: the session just became complete.
    pub completed: bool,
    /// The state was reset to its initial value.
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressRole {
    Host,
    Mirror,
}

#[derive(Debug, Clone, Copy)]
struct CatchUp {
    sent_at: Millis,
    attempts: u32,
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct ProgressCoordinator {
    role: ProgressRole,
    task_count: usize,
    state: ProgressState,
    completion_signaled: bool,
    hints_used: u32,
    /// Mirror only: proposals sent and not yet reflected by the host.
    tentative: BTreeSet<TaskId>,
    catch_up: Option<CatchUp>,
    catch_up_timeout_ms: Millis,
    catch_up_attempts: u32,
}

impl ProgressCoordinator {
    #[must_use]
    pub fn new(role: ProgressRole, task_count: usize, catch_up_timeout_ms: Millis, catch_up_attempts: u32) -> Self {
        Self {
            role,
            task_count,
            state: ProgressState::default(),
            completion_signaled: false,
            hints_used: 0,
            tentative: BTreeSet::new(),
            catch_up: None,
            catch_up_timeout_ms,
            catch_up_attempts: catch_up_attempts.max(1),
        }
    }

    #[must_use]
    pub fn role(&self) -> ProgressRole {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.task_count > 0 && self.state.completed_task_ids.len() >= self.task_count
    }

    #[must_use]
    pub fn hints_used(&self) -> u32 {
        self.hints_used
    }

    /// Proposals this mirror is still waiting to see in canonical state.
    #[must_use]
    pub fn tentative(&self) -> &BTreeSet<TaskId> {
        &self.tentative
    }

    #[must_use]
    pub fn awaiting_catch_up(&self) -> bool {
        self.catch_up.is_some()
    }

    /// Current canonical snapshot as a broadcastable message.
    #[must_use]
    pub fn snapshot_message(&self) -> Message {
        Message::ProgressUpdated(self.state.clone())
    }

    // -------------------------------------------------------------------------
    // Host
    // -------------------------------------------------------------------------

    /// Record a submission. The only path that mutates canonical progress.
    pub fn submit(
        &mut self,
        task_id: &TaskId,
        is_correct: bool,
        solver: &PeerId,
        content: &dyn PuzzleContent,
    ) -> ProgressOutcome {
        let mut out = ProgressOutcome::default();
        if self.role != ProgressRole::Host {
            debug!(%task_id, "progress: mirror cannot submit");
            return out;
        }
        if !is_correct {
            return out;
        }
        if !content.contains(task_id) {
            debug!(%task_id, %solver, "progress: ignoring unknown task id");
            return out;
        }
        if self.state.completed_task_ids.contains(task_id) {
            debug!(%task_id, %solver, "progress: task already completed");
            return out;
        }

        self.state.completed_task_ids.insert(task_id.clone());
        self.state.solved_by.insert(task_id.clone(), solver.clone());
        self.state.current_task_index = self.state.completed_task_ids.len();
        self.state.hint_used_for_current = false;
        self.state.clock += 1;

        out.changed = true;
        out.broadcast.push(self.snapshot_message());
        self.check_completion(&mut out);
        out
    }

    /// A guest's `TaskAnswered`, treated exactly like the host's own correct
    /// submission. Duplicates and unknown ids are no-ops.
    pub fn merge_proposal(&mut self, proposer: &PeerId, task_id: &TaskId, content: &dyn PuzzleContent) -> ProgressOutcome {
        self.submit(task_id, true, proposer, content)
    }

    /// Mark the hint as used for the task in flight. At most once per task.
    pub fn use_hint(&mut self) -> ProgressOutcome {
        let mut out = ProgressOutcome::default();
        if self.role != ProgressRole::Host || self.state.hint_used_for_current || self.is_complete() {
            return out;
        }
        self.state.hint_used_for_current = true;
        self.state.clock += 1;
        self.hints_used += 1;
        out.changed = true;
        out.broadcast.push(self.snapshot_message());
        out
    }

    /// A guest's `HintRequested`. Requests for a task no longer in flight are dropped.
    pub fn merge_hint_request(&mut self, task_index: usize) -> ProgressOutcome {
        if task_index != self.state.current_task_index {
            debug!(task_index, current = self.state.current_task_index, "progress: stale hint request");
            return ProgressOutcome::default();
        }
        self.use_hint()
    }

    /// Back to the initial state. Broadcasts `GameReset` then a fresh snapshot.
    pub fn reset(&mut self) -> ProgressOutcome {
        let mut out = ProgressOutcome::default();
        if self.role != ProgressRole::Host {
            return out;
        }
        let clock = self.state.clock + 1;
        self.state = ProgressState::initial(clock);
        self.completion_signaled = false;
        self.hints_used = 0;

        out.changed = true;
        out.reset = true;
        out.broadcast.push(Message::GameReset(GameReset { clock }));
        out.broadcast.push(self.snapshot_message());
        out
    }

    // -------------------------------------------------------------------------
    // Mirror
    // -------------------------------------------------------------------------

    /// Propose a solved task to the host. Nothing changes locally except the
    /// tentative set, which the next canonical snapshot supersedes.
    pub fn propose(&mut self, proposer: &PeerId, task_id: &TaskId) -> Option<Message> {
        if self.role != ProgressRole::Mirror || self.state.completed_task_ids.contains(task_id) {
            return None;
        }
        self.tentative.insert(task_id.clone());
        Some(Message::TaskAnswered(TaskAnswered { peer_id: proposer.clone(), task_id: task_id.clone() }))
    }

    /// Replace local state with a canonical snapshot unless it is older than
    /// what we hold.
    pub fn apply(&mut self, snapshot: ProgressState) -> ProgressOutcome {
        let mut out = ProgressOutcome::default();
        if self.role != ProgressRole::Mirror {
            return out;
        }
        if snapshot.clock < self.state.clock {
            debug!(incoming = snapshot.clock, current = self.state.clock, "progress: dropping stale snapshot");
            return out;
        }

        self.catch_up = None;
        if snapshot.completed_task_ids.len() < self.state.completed_task_ids.len() {
            // Only a reset shrinks the set; its GameReset may have been lost.
            self.hints_used = 0;
            self.tentative.clear();
            out.reset = true;
        }
        let hint_is_new = snapshot.hint_used_for_current
            && !(self.state.hint_used_for_current && self.state.current_task_index == snapshot.current_task_index);
        if hint_is_new {
            self.hints_used += 1;
        }
        out.changed = snapshot != self.state;
        self.state = snapshot;
        let completed = &self.state.completed_task_ids;
        self.tentative.retain(|t| !completed.contains(t));
        self.check_completion(&mut out);
        out
    }

    /// Host announced a reset. The snapshot that follows carries the same
    /// clock, so applying either one first converges to the same state.
    pub fn on_reset(&mut self, clock: u64) -> ProgressOutcome {
        let mut out = ProgressOutcome::default();
        if self.role != ProgressRole::Mirror || clock <= self.state.clock {
            return out;
        }
        self.state = ProgressState::initial(clock);
        self.tentative.clear();
        self.completion_signaled = false;
        self.hints_used = 0;
        out.changed = true;
        out.reset = true;
        out
    }

    /// Ask the host for canonical state now instead of waiting.
    pub fn request_catch_up(&mut self, now: Millis) -> Message {
        self.catch_up = Some(CatchUp { sent_at: now, attempts: 1 });
        Message::ProgressRequest
    }

    /// Re-send `ProgressRequest` after the catch-up timeout, a bounded number
    /// of times. After that the next natural broadcast heals the mirror.
    pub fn poll(&mut self, now: Millis) -> Option<Message> {
        let catch_up = self.catch_up.as_mut()?;
        if now.saturating_sub(catch_up.sent_at) < self.catch_up_timeout_ms {
            return None;
        }
        if catch_up.attempts >= self.catch_up_attempts {
            warn!(attempts = catch_up.attempts, "progress: host never answered catch-up; waiting for next update");
            self.catch_up = None;
            return None;
        }
        catch_up.attempts += 1;
        catch_up.sent_at = now;
        Some(Message::ProgressRequest)
    }

    fn check_completion(&mut self, out: &mut ProgressOutcome) {
        let complete = self.is_complete();
        if complete && !self.completion_signaled {
            self.completion_signaled = true;
            out.completed = true;
        } else if !complete {
            self.completion_signaled = false;
        }
    }
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;
