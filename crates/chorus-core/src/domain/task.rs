//! Task record: the queued unit of work and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};

/// Task type, following `{namespace}.{domain}.{action}.v{major}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    /// Render one chapter of text into a finished audio artifact.
    pub const AUDIO_CHAPTER: &'static str = "chorus.audio.chapter.v1";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn audio_chapter() -> Self {
        Self::new(Self::AUDIO_CHAPTER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task status.
///
/// State transitions:
/// - Pending -> Processing (claim)
/// - Processing -> Completed | Failed (worker, exactly once)
/// - Processing -> Pending (lease expired, attempts + 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a terminal-transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved into the requested terminal state.
    Applied,
    /// The record was already in that state; nothing changed.
    Unchanged,
}

/// A terminal transition that contradicts the one already recorded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id} is already {current}")]
pub struct TerminalConflict {
    pub task_id: TaskId,
    pub current: TaskStatus,
}

/// Input for creating a task (collaborator side).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub job_id: JobId,
    pub task_type: TaskType,
    pub sequence: i32,
    pub input: serde_json::Value,
}

/// Metadata + input of a queued task.
///
/// - The owning store is the single source of truth.
/// - All state transitions happen through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    pub sequence: i32,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub worker_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,

    /// Number of times the lease expired and the task went back to pending.
    pub attempts: u32,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_id: task.job_id,
            task_type: task.task_type,
            sequence: task.sequence,
            status: TaskStatus::Pending,
            input: task.input,
            worker_id: None,
            claimed_at: None,
            attempts: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.claimed_at = Some(now);
        self.updated_at = now;
    }

    /// Heartbeat. Only the current owner may extend its lease.
    pub fn renew_lease(&mut self, worker_id: &str, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Processing || self.worker_id.as_deref() != Some(worker_id) {
            return false;
        }
        self.claimed_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>, lease_timeout: chrono::Duration) -> bool {
        self.status == TaskStatus::Processing
            && self
                .claimed_at
                .is_some_and(|claimed_at| claimed_at < now - lease_timeout)
    }

    /// Processing -> Pending after lease expiry.
    pub fn reclaim(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.attempts += 1;
        self.worker_id = None;
        self.claimed_at = None;
        self.updated_at = now;
    }

    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Transition, TerminalConflict> {
        match self.status {
            TaskStatus::Completed => Ok(Transition::Unchanged),
            TaskStatus::Failed => Err(self.conflict()),
            TaskStatus::Pending | TaskStatus::Processing => {
                self.status = TaskStatus::Completed;
                self.result = Some(result);
                self.error = None;
                self.updated_at = now;
                Ok(Transition::Applied)
            }
        }
    }

    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<Transition, TerminalConflict> {
        match self.status {
            TaskStatus::Failed => Ok(Transition::Unchanged),
            TaskStatus::Completed => Err(self.conflict()),
            TaskStatus::Pending | TaskStatus::Processing => {
                self.status = TaskStatus::Failed;
                self.error = Some(error.to_string());
                self.updated_at = now;
                Ok(Transition::Applied)
            }
        }
    }

    pub fn decode_input<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.input.clone())
    }

    fn conflict(&self) -> TerminalConflict {
        TerminalConflict {
            task_id: self.id,
            current: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap()
    }

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskId::generate(),
            NewTask {
                job_id: JobId::generate(),
                task_type: TaskType::audio_chapter(),
                sequence: 0,
                input: serde_json::json!({}),
            },
            at(0),
        )
    }

    #[rstest]
    #[case::pending(TaskStatus::Pending, "pending")]
    #[case::processing(TaskStatus::Processing, "processing")]
    #[case::completed(TaskStatus::Completed, "completed")]
    #[case::failed(TaskStatus::Failed, "failed")]
    fn status_string_form_round_trips(#[case] status: TaskStatus, #[case] text: &str) {
        assert_eq!(status.as_str(), text);
        assert_eq!(text.parse::<TaskStatus>().unwrap(), status);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn claim_stamps_owner() {
        let mut task = record();
        task.claim("worker-a", at(1));
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.worker_id.as_deref(), Some("worker-a"));
        assert_eq!(task.claimed_at, Some(at(1)));
    }

    #[test]
    fn complete_twice_is_a_noop() {
        let mut task = record();
        task.claim("w", at(1));
        let first = task.complete(serde_json::json!({"ok": 1}), at(2)).unwrap();
        let second = task.complete(serde_json::json!({"ok": 2}), at(3)).unwrap();

        assert_eq!(first, Transition::Applied);
        assert_eq!(second, Transition::Unchanged);
        assert_eq!(task.result, Some(serde_json::json!({"ok": 1})));
        assert_eq!(task.updated_at, at(2));
    }

    #[test]
    fn fail_after_complete_is_a_conflict() {
        let mut task = record();
        task.claim("w", at(1));
        task.complete(serde_json::json!({}), at(2)).unwrap();

        let err = task.fail("late", at(3)).unwrap_err();
        assert_eq!(err.current, TaskStatus::Completed);
        assert_eq!(task.error, None);
    }

    #[test]
    fn fail_twice_keeps_first_message() {
        let mut task = record();
        task.claim("w", at(1));
        assert_eq!(task.fail("boom", at(2)).unwrap(), Transition::Applied);
        assert_eq!(task.fail("again", at(3)).unwrap(), Transition::Unchanged);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn lease_expiry_uses_claimed_at() {
        let mut task = record();
        task.claim("w", at(0));
        let lease = chrono::Duration::minutes(5);

        assert!(!task.is_lease_expired(at(4), lease));
        assert!(task.is_lease_expired(at(10), lease));
    }

    #[test]
    fn reclaim_resets_and_counts() {
        let mut task = record();
        task.claim("w", at(0));
        task.reclaim(at(10));

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.worker_id, None);
        assert_eq!(task.claimed_at, None);
    }

    #[test]
    fn only_owner_renews_lease() {
        let mut task = record();
        task.claim("w1", at(0));

        assert!(!task.renew_lease("w2", at(3)));
        assert_eq!(task.claimed_at, Some(at(0)));
        assert!(task.renew_lease("w1", at(3)));
        assert_eq!(task.claimed_at, Some(at(3)));
    }
}
