//! InMemoryTaskStore - 開発用・テスト用のタスクテーブル
//!
//! テーブル全体を tokio の `Mutex` 1 つで守るので、claim / 状態遷移は
//! 互いに対してアトミックです。単一プロセス構成とテストで使います。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, TaskId, TaskRecord, TaskStatus, TaskType, Transition};
use crate::ports::{Clock, QueueCounts, StoreError, SystemClock, TaskStore};

#[derive(Default)]
struct InMemoryTaskState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,
}

impl InMemoryTaskState {
    /// Pending tasks of one type, oldest first.
    fn pending_ids(&self, task_type: &TaskType) -> Vec<TaskId> {
        let mut pending: Vec<&TaskRecord> = self
            .records
            .values()
            .filter(|r| r.status == TaskStatus::Pending && &r.task_type == task_type)
            .collect();
        pending.sort_by(|a, b| {
            (a.created_at, a.sequence, a.id).cmp(&(b.created_at, b.sequence, b.id))
        });
        pending.into_iter().map(|r| r.id).collect()
    }

    fn record_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord, StoreError> {
        self.records
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound(task_id))
    }
}

pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryTaskState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryTaskState::default())),
            clock,
        }
    }

    /// Snapshot of every record (for inspection in tests and `status`).
    pub async fn all(&self) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<TaskRecord> = state.records.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.sequence, r.id));
        records
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let id = TaskId::generate();
        let record = TaskRecord::new(id, task, self.clock.now());
        self.state.lock().await.records.insert(id, record);
        Ok(id)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        task_type: &TaskType,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let ids = state.pending_ids(task_type);

        let mut claimed = Vec::new();
        for id in ids.into_iter().take(limit) {
            let record = state.record_mut(id)?;
            record.claim(worker_id, now);
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn renew_lease(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(state.record_mut(task_id)?.renew_lease(worker_id, now))
    }

    async fn mark_complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(state.record_mut(task_id)?.complete(result, now)?)
    }

    async fn mark_failed(&self, task_id: TaskId, error: &str) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(state.record_mut(task_id)?.fail(error, now)?)
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64, StoreError> {
        let lease = chrono::Duration::from_std(lease_timeout)
            .map_err(|e| StoreError::QueryFailed(format!("lease timeout out of range: {e}")))?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut reclaimed = 0;
        for record in state.records.values_mut() {
            if record.is_lease_expired(now, lease) {
                record.reclaim(now);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(&task_id).cloned())
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in state.records.values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }
}
