//! EventSink port - イベント記録の抽象化
//!
//! パイプラインは業務ロジックの中で直接メトリクスやデバッグ出力を
//! 送らず、`PipelineEvent` をこの sink に渡すだけにします。

use std::sync::Mutex;

use crate::domain::PipelineEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// 本番用: tracing に構造化ログとして出す
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let name = event.name();
        match event {
            PipelineEvent::TaskClaimed { task_id, worker_id } => {
                tracing::info!(event = name, task_id = %task_id, worker_id = %worker_id, "Task claimed");
            }
            PipelineEvent::ChunkSynthesized {
                task_id,
                index,
                total,
                bytes,
            } => {
                tracing::debug!(
                    event = name,
                    task_id = %task_id,
                    chunk = index + 1,
                    total,
                    bytes,
                    "Chunk synthesized"
                );
            }
            PipelineEvent::SynthesisRetry {
                attempt,
                max_attempts,
                error,
            } => {
                tracing::warn!(event = name, attempt, max_attempts, error = %error, "Synthesis attempt failed, retrying");
            }
            PipelineEvent::LeaseLost { task_id, worker_id } => {
                tracing::warn!(event = name, task_id = %task_id, worker_id = %worker_id, "Task lease lost");
            }
            PipelineEvent::TranscodeFallback { from, to, error } => {
                tracing::warn!(event = name, from = %from, to = %to, error = %error, "Primary encode failed, using fallback format");
            }
            PipelineEvent::TaskCompleted {
                task_id,
                storage_path,
                duration_secs,
            } => {
                tracing::info!(event = name, task_id = %task_id, path = %storage_path, duration_secs, "Task completed");
            }
            PipelineEvent::TaskFailed { task_id, error } => {
                tracing::error!(event = name, task_id = %task_id, error = %error, "Task failed");
            }
            PipelineEvent::StaleTasksReclaimed { count } => {
                tracing::warn!(event = name, count, "Reclaimed tasks with expired leases");
            }
            PipelineEvent::WatchdogTickFailed { error } => {
                tracing::warn!(event = name, error = %error, "Watchdog tick failed");
            }
        }
    }
}

/// テスト用: 受け取ったイベントを保持する
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PipelineEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
