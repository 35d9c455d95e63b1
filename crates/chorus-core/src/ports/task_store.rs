//! TaskStore port - タスクテーブルの正本（source of truth）
//!
//! タスクの状態を変更できるのはこの trait の操作だけです。
//! worker 間で共有される可変リソースはタスクテーブルのみで、
//! claim / complete / fail / reclaim がその唯一の並行制御境界になります。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{NewTask, TaskId, TaskRecord, TaskStatus, TaskType, TerminalConflict, Transition};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a pending task (collaborator side).
    async fn enqueue(&self, task: NewTask) -> Result<TaskId, StoreError>;

    /// Atomically move up to `limit` of the oldest pending tasks of
    /// `task_type` to processing. Concurrent callers never share a row.
    async fn claim_next(
        &self,
        worker_id: &str,
        task_type: &TaskType,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Refresh `claimed_at` while `worker_id` still owns the task.
    /// `Ok(false)` means the lease was lost.
    async fn renew_lease(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError>;

    async fn mark_complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<Transition, StoreError>;

    async fn mark_failed(&self, task_id: TaskId, error: &str) -> Result<Transition, StoreError>;

    /// Processing tasks claimed before `now - lease_timeout` go back to
    /// pending with `attempts + 1`. Returns how many were reclaimed.
    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64, StoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError>;
}

/// Queue depth per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Processing => self.processing += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error(transparent)]
    TerminalConflict(#[from] TerminalConflict),
    #[error("corrupt task row: {0}")]
    Corrupt(String),
}
