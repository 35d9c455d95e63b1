//! Pipeline events emitted through `ports::EventSink`.

use super::artifact::AudioFormat;
use super::ids::TaskId;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    TaskClaimed {
        task_id: TaskId,
        worker_id: String,
    },
    ChunkSynthesized {
        task_id: TaskId,
        index: usize,
        total: usize,
        bytes: usize,
    },
    SynthesisRetry {
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    LeaseLost {
        task_id: TaskId,
        worker_id: String,
    },
    TranscodeFallback {
        from: AudioFormat,
        to: AudioFormat,
        error: String,
    },
    TaskCompleted {
        task_id: TaskId,
        storage_path: String,
        duration_secs: f64,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    StaleTasksReclaimed {
        count: u64,
    },
    WatchdogTickFailed {
        error: String,
    },
}

impl PipelineEvent {
    /// Stable name for log/metric keys.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::TaskClaimed { .. } => "task_claimed",
            PipelineEvent::ChunkSynthesized { .. } => "chunk_synthesized",
            PipelineEvent::SynthesisRetry { .. } => "synthesis_retry",
            PipelineEvent::LeaseLost { .. } => "lease_lost",
            PipelineEvent::TranscodeFallback { .. } => "transcode_fallback",
            PipelineEvent::TaskCompleted { .. } => "task_completed",
            PipelineEvent::TaskFailed { .. } => "task_failed",
            PipelineEvent::StaleTasksReclaimed { .. } => "stale_tasks_reclaimed",
            PipelineEvent::WatchdogTickFailed { .. } => "watchdog_tick_failed",
        }
    }
}
