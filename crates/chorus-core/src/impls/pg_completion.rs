use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::domain::ChapterCompletion;
use crate::ports::{CompletionError, CompletionSink};

/// Records chapter outcomes in `chapter_artifacts`, one row per chapter.
///
/// A later failure never overwrites a recorded success.
pub struct PgCompletionSink {
    pool: PgPool,
}

impl PgCompletionSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompletionSink for PgCompletionSink {
    #[instrument(skip(self, completion), fields(chapter_id = %completion.chapter_id, success = completion.is_success()))]
    async fn complete(&self, completion: &ChapterCompletion) -> Result<(), CompletionError> {
        let artifact = completion.artifact.as_ref();
        let status = if completion.is_success() {
            "completed"
        } else {
            "failed"
        };
        let size_bytes = artifact
            .map(|a| i64::try_from(a.size_bytes))
            .transpose()
            .map_err(|e| CompletionError::Rejected(format!("artifact too large: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO chapter_artifacts
                (chapter_id, job_id, task_id, storage_path, content_type, format,
                 duration_secs, size_bytes, url, status, error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
            ON CONFLICT (chapter_id) DO UPDATE SET
                job_id = EXCLUDED.job_id,
                task_id = EXCLUDED.task_id,
                storage_path = EXCLUDED.storage_path,
                content_type = EXCLUDED.content_type,
                format = EXCLUDED.format,
                duration_secs = EXCLUDED.duration_secs,
                size_bytes = EXCLUDED.size_bytes,
                url = EXCLUDED.url,
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                updated_at = now()
            WHERE chapter_artifacts.status <> 'completed' OR EXCLUDED.status = 'completed'
            "#,
        )
        .bind(completion.chapter_id.to_db())
        .bind(completion.job_id.to_db())
        .bind(completion.task_id.to_db())
        .bind(artifact.map(|a| a.storage_path.as_str()))
        .bind(artifact.map(|a| a.content_type.as_str()))
        .bind(artifact.map(|a| a.format.extension()))
        .bind(artifact.map(|a| a.duration_secs))
        .bind(size_bytes)
        .bind(artifact.and_then(|a| a.url.as_deref()))
        .bind(status)
        .bind(completion.error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| CompletionError::Failed(e.to_string()))?;

        Ok(())
    }
}
