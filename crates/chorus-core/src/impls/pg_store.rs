//! PgTaskStore - PostgreSQL 上のタスクテーブル
//!
//! - claim は `FOR UPDATE SKIP LOCKED` で行を奪い合わずに取得します。
//! - 時刻はすべて DB の `now()` を使います（worker 間の時計ずれを避ける）。
//! - ID はプレフィックスなしの ULID 文字列で保存します。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::domain::{
    NewTask, TaskId, TaskRecord, TaskStatus, TaskType, TerminalConflict, Transition,
};
use crate::ports::{QueueCounts, StoreError, TaskStore};

const TASK_COLUMNS: &str = "id, job_id, task_type, sequence, status, input, worker_id, \
     claimed_at, attempts, result, error, created_at, updated_at";

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations. Already-applied versions are skipped.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("migration failed: {e}")))?;
        tracing::info!("Task schema is up to date");
        Ok(())
    }

    /// Decide the outcome of a terminal update that touched no row.
    async fn resolve_terminal(
        &self,
        task_id: TaskId,
        target: TaskStatus,
    ) -> Result<Transition, StoreError> {
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE id = $1")
            .bind(task_id.to_db())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        let Some(current) = current else {
            return Err(StoreError::NotFound(task_id));
        };
        let current: TaskStatus = current.parse().map_err(StoreError::Corrupt)?;

        if current == target {
            Ok(Transition::Unchanged)
        } else if current.is_terminal() {
            Err(TerminalConflict { task_id, current }.into())
        } else {
            Err(StoreError::QueryFailed(format!(
                "task {task_id} changed concurrently (now {current})"
            )))
        }
    }
}

fn query_failed(e: sqlx::Error) -> StoreError {
    StoreError::QueryFailed(e.to_string())
}

fn task_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(e.to_string());

    let id: String = row.try_get("id").map_err(corrupt)?;
    let job_id: String = row.try_get("job_id").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let attempts: i32 = row.try_get("attempts").map_err(corrupt)?;

    Ok(TaskRecord {
        id: id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        job_id: job_id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        task_type: TaskType::new(row.try_get::<String, _>("task_type").map_err(corrupt)?),
        sequence: row.try_get("sequence").map_err(corrupt)?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        input: row.try_get("input").map_err(corrupt)?,
        worker_id: row.try_get("worker_id").map_err(corrupt)?,
        claimed_at: row.try_get("claimed_at").map_err(corrupt)?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Corrupt(format!("negative attempts: {attempts}")))?,
        result: row.try_get("result").map_err(corrupt)?,
        error: row.try_get("error").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(job_id = %task.job_id, task_type = %task.task_type))]
    async fn enqueue(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let id = TaskId::generate();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, job_id, task_type, sequence, status, input)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            "#,
        )
        .bind(id.to_db())
        .bind(task.job_id.to_db())
        .bind(task.task_type.as_str())
        .bind(task.sequence)
        .bind(&task.input)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(id)
    }

    #[instrument(skip(self), fields(task_type = %task_type))]
    async fn claim_next(
        &self,
        worker_id: &str,
        task_type: &TaskType,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'processing', worker_id = $1, claimed_at = now(), updated_at = now()
            WHERE id IN (
                SELECT id FROM tasks
                WHERE status = 'pending' AND task_type = $2
                ORDER BY created_at, sequence, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .bind(task_type.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        // RETURNING does not keep the subquery order.
        let mut claimed = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|r| (r.created_at, r.sequence, r.id));
        Ok(claimed)
    }

    /// A missing task reports `false`, same as a lost lease.
    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn renew_lease(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET claimed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'processing' AND worker_id = $2
            "#,
        )
        .bind(task_id.to_db())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self, result), fields(task_id = %task_id))]
    async fn mark_complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<Transition, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', result = $2, error = NULL, updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(task_id.to_db())
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if done.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.resolve_terminal(task_id, TaskStatus::Completed).await
    }

    #[instrument(skip(self, error), fields(task_id = %task_id))]
    async fn mark_failed(&self, task_id: TaskId, error: &str) -> Result<Transition, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error = $2, updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(task_id.to_db())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if done.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }
        self.resolve_terminal(task_id, TaskStatus::Failed).await
    }

    #[instrument(skip(self), fields(lease_secs = lease_timeout.as_secs()))]
    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', attempts = attempts + 1,
                worker_id = NULL, claimed_at = NULL, updated_at = now()
            WHERE status = 'processing'
              AND claimed_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(lease_timeout.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(done.rows_affected())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(task_id.to_db())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(query_failed)?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            let status: TaskStatus = status.parse().map_err(StoreError::Corrupt)?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }
}
