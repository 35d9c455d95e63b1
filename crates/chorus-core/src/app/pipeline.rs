//! ChapterPipeline - 1 タスク分の音声を作る
//!
//! テキスト解決 → chunk 分割 → chunk ごとに合成（順番に 1 つずつ）→ 連結 → 変換。
//! 保存と完了通知は `ArtifactFinalizer` の担当です。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::audio::{self, AudioError, TranscodeError, Transcoder};
use crate::domain::{ChapterTask, EncodedAudio, PipelineEvent, TaskId, TaskRecord, TextSource};
use crate::ports::{
    ArtifactStore, CompletionError, EventSink, StorageError, StoreError, TaskStore,
};
use crate::text::TextChunker;
use crate::tts::{Heartbeat, SynthesisError, TtsClient};

/// Per-task failure. Recorded as the task's error message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid task input: {0}")]
    InvalidInput(String),
    #[error("chapter text is empty")]
    EmptyText,
    #[error("failed to load chapter text: {0}")]
    Text(#[source] StorageError),
    #[error("chunk {index}/{total} synthesis failed: {source}")]
    Synthesis {
        index: usize,
        total: usize,
        #[source]
        source: SynthesisError,
    },
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("artifact upload failed: {0}")]
    Upload(#[from] StorageError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode task result: {0}")]
    Result(#[from] serde_json::Error),
}

/// Finished audio of one chapter, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedChapter {
    pub audio: EncodedAudio,
    pub duration_secs: f64,
    pub chunks: usize,
}

pub struct ChapterPipeline {
    chunker: TextChunker,
    tts: TtsClient,
    transcoder: Transcoder,
    artifacts: Arc<dyn ArtifactStore>,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
}

impl ChapterPipeline {
    pub fn new(
        chunker: TextChunker,
        tts: TtsClient,
        transcoder: Transcoder,
        artifacts: Arc<dyn ArtifactStore>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            chunker,
            tts,
            transcoder,
            artifacts,
            store,
            events,
        }
    }

    pub async fn resolve_text(&self, source: &TextSource) -> Result<String, PipelineError> {
        match source {
            TextSource::Inline { text } => Ok(text.clone()),
            TextSource::Artifact { path } => {
                let bytes = self.artifacts.get(path).await.map_err(PipelineError::Text)?;
                String::from_utf8(bytes).map_err(|e| {
                    PipelineError::InvalidInput(format!("text artifact {path} is not UTF-8: {e}"))
                })
            }
        }
    }

    /// Render `chapter` for `task`, renewing `worker_id`'s lease while each
    /// chunk polls or retries and after it finishes.
    pub async fn render(
        &self,
        task: &TaskRecord,
        chapter: &ChapterTask,
        worker_id: &str,
    ) -> Result<RenderedChapter, PipelineError> {
        let text = self.resolve_text(&chapter.source).await?;
        let chunks = self.chunker.split(&text);
        if chunks.is_empty() {
            return Err(PipelineError::EmptyText);
        }

        let total = chunks.len();
        tracing::info!(chunks = total, chars = text.chars().count(), "Synthesizing chapter");

        let lease = LeaseHeartbeat::new(
            self.store.clone(),
            self.events.clone(),
            task.id,
            worker_id,
        );
        let mut buffers = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let audio = self
                .tts
                .generate_with_heartbeat(chunk, &chapter.voice_ref, &chapter.params, &lease)
                .await
                .map_err(|source| PipelineError::Synthesis {
                    index: index + 1,
                    total,
                    source,
                })?;
            self.events.emit(&PipelineEvent::ChunkSynthesized {
                task_id: task.id,
                index,
                total,
                bytes: audio.len(),
            });
            buffers.push(audio);
            lease.beat().await;
        }

        let pcm = audio::concatenate(&buffers)?;
        let duration_secs = audio::parse_header(&pcm)
            .map(|h| h.duration_secs())
            .unwrap_or(0.0);
        let encoded = self.transcoder.encode_with_fallback(&pcm).await?;

        Ok(RenderedChapter {
            audio: encoded,
            duration_secs,
            chunks: total,
        })
    }
}

/// Renews one task's lease. Never aborts the task; completion is idempotent
/// either way. A lost lease is reported once.
pub(crate) struct LeaseHeartbeat {
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
    task_id: TaskId,
    worker_id: String,
    lost: AtomicBool,
}

impl LeaseHeartbeat {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
        task_id: TaskId,
        worker_id: &str,
    ) -> Self {
        Self {
            store,
            events,
            task_id,
            worker_id: worker_id.to_string(),
            lost: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Heartbeat for LeaseHeartbeat {
    async fn beat(&self) {
        match self.store.renew_lease(self.task_id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => {
                if !self.lost.swap(true, Ordering::SeqCst) {
                    self.events.emit(&PipelineEvent::LeaseLost {
                        task_id: self.task_id,
                        worker_id: self.worker_id.clone(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Lease renewal failed")
            }
        }
    }
}
