//! ArtifactFinalizer - タスクを終端状態にする唯一の経路
//!
//! 順序: (成功時のみ) 音声を保存 → ジョブ所有者へ完了通知 → TaskStore の終端遷移。
//! 通知と遷移の間でクラッシュしても、Watchdog の reclaim と冪等な再実行で回復します。

use std::sync::Arc;

use super::pipeline::{PipelineError, RenderedChapter};
use crate::domain::{
    ArtifactRecord, ChapterCompletion, ChapterTask, PipelineEvent, TaskRecord, Transition,
};
use crate::ports::{ArtifactStore, CompletionSink, EventSink, TaskStore};

/// What the single completion call recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub completion: ChapterCompletion,
    pub transition: Transition,
}

pub struct ArtifactFinalizer {
    artifacts: Arc<dyn ArtifactStore>,
    sink: Arc<dyn CompletionSink>,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
}

impl ArtifactFinalizer {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        sink: Arc<dyn CompletionSink>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            artifacts,
            sink,
            store,
            events,
        }
    }

    /// Upload the rendered chapter (if any) and finalize the task.
    ///
    /// A render or upload failure becomes a failed completion; the returned
    /// error only covers the completion call and the terminal transition.
    pub async fn upload_and_finalize(
        &self,
        task: &TaskRecord,
        chapter: &ChapterTask,
        rendered: Result<RenderedChapter, PipelineError>,
    ) -> Result<Finalized, PipelineError> {
        let uploaded = match rendered {
            Ok(rendered) => self.upload(task, chapter, rendered).await,
            Err(e) => Err(e),
        };

        let completion = match uploaded {
            Ok(artifact) => ChapterCompletion::succeeded(artifact),
            Err(e) => {
                ChapterCompletion::failed(chapter.chapter_id, chapter.job_id, task.id, e.to_string())
            }
        };
        self.finalize(task, completion).await
    }

    async fn upload(
        &self,
        task: &TaskRecord,
        chapter: &ChapterTask,
        rendered: RenderedChapter,
    ) -> Result<ArtifactRecord, PipelineError> {
        let format = rendered.audio.format;
        let path = chapter.storage_path(format);
        let stored = self
            .artifacts
            .put(&path, rendered.audio.bytes, format.content_type())
            .await?;

        Ok(ArtifactRecord {
            chapter_id: chapter.chapter_id,
            job_id: chapter.job_id,
            task_id: task.id,
            storage_path: stored.path,
            url: stored.url,
            content_type: format.content_type().to_string(),
            format,
            duration_secs: rendered.duration_secs,
            size_bytes: stored.size_bytes,
        })
    }

    /// Completion call first, then the store's terminal transition.
    pub async fn finalize(
        &self,
        task: &TaskRecord,
        completion: ChapterCompletion,
    ) -> Result<Finalized, PipelineError> {
        self.sink.complete(&completion).await?;

        let transition = match (&completion.artifact, &completion.error) {
            (Some(artifact), _) => {
                let result = serde_json::to_value(artifact)?;
                self.store.mark_complete(task.id, result).await?
            }
            (None, error) => {
                let error = error.as_deref().unwrap_or("unknown error");
                self.store.mark_failed(task.id, error).await?
            }
        };

        if transition == Transition::Applied {
            self.emit_terminal(task, &completion);
        } else {
            tracing::debug!(task_id = %task.id, "Task was already finalized");
        }

        Ok(Finalized {
            completion,
            transition,
        })
    }

    /// Input that cannot be decoded has no chapter to notify; only the task fails.
    pub async fn reject_input(
        &self,
        task: &TaskRecord,
        error: &str,
    ) -> Result<Transition, PipelineError> {
        let transition = self.store.mark_failed(task.id, error).await?;
        if transition == Transition::Applied {
            self.events.emit(&PipelineEvent::TaskFailed {
                task_id: task.id,
                error: error.to_string(),
            });
        }
        Ok(transition)
    }

    fn emit_terminal(&self, task: &TaskRecord, completion: &ChapterCompletion) {
        let event = match &completion.artifact {
            Some(artifact) => PipelineEvent::TaskCompleted {
                task_id: task.id,
                storage_path: artifact.storage_path.clone(),
                duration_secs: artifact.duration_secs,
            },
            None => PipelineEvent::TaskFailed {
                task_id: task.id,
                error: completion.error.clone().unwrap_or_default(),
            },
        };
        self.events.emit(&event);
    }
}
