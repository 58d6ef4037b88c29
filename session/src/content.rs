//! External collaborators the coordinator consumes by interface only.
//!
//! `PuzzleContent` answers "how many tasks" and "is this answer right".
//! `SummarySink` receives one summary from the host after completion.
//! `AnswerKey` is the file-backed content used by the CLI and tests.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Millis, PeerId, TaskId};

// =============================================================================
// PUZZLE CONTENT
// =============================================================================

pub trait PuzzleContent: Send + Sync {
    fn task_count(&self) -> usize;

    /// Task id at a position in the playthrough order.
    fn task_id(&self, index: usize) -> Option<TaskId>;

    fn contains(&self, task_id: &TaskId) -> bool;

    /// Matching policy is provider-specific.
    fn check_answer(&self, task_id: &TaskId, answer: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum AnswerKeyError {
    #[error("failed to read answer key: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid answer key JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("answer key has no tasks")]
    Empty,
    #[error("duplicate task id in answer key: {0}")]
    DuplicateTask(TaskId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedTask {
    pub id: TaskId,
    /// Accepted answers; any one matches.
    pub answers: Vec<String>,
}

/// Answer key loaded from JSON: `{"tasks": [{"id": "0", "answers": ["..."]}]}`.
/// Matching ignores case, surrounding whitespace, and repeated inner spaces.
/// Deserializing goes through [`AnswerKey::new`], so a key is never empty and
/// never repeats a task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AnswerKeyFile")]
pub struct AnswerKey {
    tasks: Vec<KeyedTask>,
}

/// On-disk shape before validation.
#[derive(Deserialize)]
struct AnswerKeyFile {
    tasks: Vec<KeyedTask>,
}

impl TryFrom<AnswerKeyFile> for AnswerKey {
    type Error = AnswerKeyError;

    fn try_from(file: AnswerKeyFile) -> Result<Self, Self::Error> {
        Self::new(file.tasks)
    }
}

impl AnswerKey {
    /// # Errors
    ///
    /// Returns `Empty` for a key without tasks and `DuplicateTask` when two
    /// tasks share an id.
    pub fn new(tasks: Vec<KeyedTask>) -> Result<Self, AnswerKeyError> {
        if tasks.is_empty() {
            return Err(AnswerKeyError::Empty);
        }
        let mut seen = std::collections::BTreeSet::new();
        for task in &tasks {
            if !seen.insert(&task.id) {
                return Err(AnswerKeyError::DuplicateTask(task.id.clone()));
            }
        }
        Ok(Self { tasks })
    }

    /// # Errors
    ///
    /// Returns `Json` for malformed input, plus the validation errors of [`AnswerKey::new`].
    pub fn from_json(raw: &str) -> Result<Self, AnswerKeyError> {
        let file: AnswerKeyFile = serde_json::from_str(raw)?;
        Self::try_from(file)
    }

    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read, plus [`AnswerKey::from_json`] errors.
    pub fn load(path: &Path) -> Result<Self, AnswerKeyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

impl PuzzleContent for AnswerKey {
    fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn task_id(&self, index: usize) -> Option<TaskId> {
        self.tasks.get(index).map(|t| t.id.clone())
    }

    fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.iter().any(|t| &t.id == task_id)
    }

    fn check_answer(&self, task_id: &TaskId, answer: &str) -> bool {
        let given = normalize_answer(answer);
        if given.is_empty() {
            return false;
        }
        self.tasks
            .iter()
            .find(|t| &t.id == task_id)
            .is_some_and(|t| t.answers.iter().any(|a| normalize_answer(a) == given))
    }
}

pub(crate) fn normalize_answer(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// SUMMARY SINK
// =============================================================================

/// What the host records once a session is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_code: String,
    pub host_peer_id: PeerId,
    pub task_count: usize,
    pub solved_by: BTreeMap<TaskId, PeerId>,
    pub hints_used: u32,
    pub participants: Vec<PeerId>,
    pub completed_at: Millis,
}

#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn record(&self, summary: &SessionSummary);
}

/// Default sink: writes the summary to the log.
pub struct LogSummarySink;

#[async_trait]
impl SummarySink for LogSummarySink {
    async fn record(&self, summary: &SessionSummary) {
        info!(
            session = %summary.session_code,
            tasks = summary.task_count,
            hints = summary.hints_used,
            participants = summary.participants.len(),
            "session complete"
        );
    }
}

#[cfg(test)]
#[path = "content_test.rs"]
mod tests;
