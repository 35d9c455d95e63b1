//! Worker - claim → pipeline → 完了 のループ
//!
//! # 状態遷移
//! `Idle → Claiming → Processing → {Succeeded | Failed} → Idle`
//!
//! # 方針
//! - 1 worker につき同時に 1 タスク（claim の limit は 1）
//! - 停止要求はタスクの間でだけ見る（処理中のタスクは必ず終端まで進める）
//! - 処理中の panic はタスク単位で捕まえ、cool-down の後に再開する。
//!   claim は放棄され、Watchdog が回収する

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::finalizer::ArtifactFinalizer;
use super::pipeline::ChapterPipeline;
use crate::domain::{ChapterTask, PipelineEvent, TaskId, TaskRecord, TaskType};
use crate::error::ChorusError;
use crate::ports::{EventSink, Sleeper, TaskStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub task_type: TaskType,
    /// Sleep after an empty claim.
    pub poll_interval: Duration,
    /// Sleep after an unhandled error or panic.
    pub error_cooldown: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", ulid::Ulid::new()),
            task_type: TaskType::audio_chapter(),
            poll_interval: Duration::from_secs(5),
            error_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claiming,
    Processing,
    Succeeded,
    Failed,
}

/// Result of one claim + process round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to claim.
    Idle,
    Succeeded(TaskId),
    Failed(TaskId),
}

pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn TaskStore>,
    pipeline: ChapterPipeline,
    finalizer: ArtifactFinalizer,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<dyn EventSink>,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        pipeline: ChapterPipeline,
        finalizer: ArtifactFinalizer,
        sleeper: Arc<dyn Sleeper>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            config,
            store,
            pipeline,
            finalizer,
            sleeper,
            events,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Claim at most one task and drive it to a terminal state.
    ///
    /// Errors are loop-level: the claim failed, the completion call failed,
    /// or processing panicked. The task then stays `processing` until its
    /// lease expires.
    pub async fn tick(self: &Arc<Self>) -> Result<TickOutcome, ChorusError> {
        self.set_state(WorkerState::Claiming);
        let claimed = self
            .store
            .claim_next(&self.config.worker_id, &self.config.task_type, 1)
            .await;
        let task = match claimed.map(|mut tasks| tasks.pop()) {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.set_state(WorkerState::Idle);
                return Ok(TickOutcome::Idle);
            }
            Err(e) => {
                self.set_state(WorkerState::Idle);
                return Err(e.into());
            }
        };

        self.events.emit(&PipelineEvent::TaskClaimed {
            task_id: task.id,
            worker_id: self.config.worker_id.clone(),
        });
        self.set_state(WorkerState::Processing);

        let task_id = task.id;
        let this = Arc::clone(self);
        let joined = tokio::spawn(async move { this.process(task).await }).await;

        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ChorusError::WorkerPanicked { task_id }),
            Err(e) => Err(ChorusError::WorkerAborted {
                task_id,
                message: e.to_string(),
            }),
        };

        self.set_state(match &outcome {
            Ok(TickOutcome::Succeeded(_)) => WorkerState::Succeeded,
            _ => WorkerState::Failed,
        });
        outcome
    }

    async fn process(&self, task: TaskRecord) -> Result<TickOutcome, ChorusError> {
        let chapter: ChapterTask = match task.decode_input() {
            Ok(chapter) => chapter,
            Err(e) => {
                let message = format!("invalid task input: {e}");
                self.finalizer.reject_input(&task, &message).await?;
                return Ok(TickOutcome::Failed(task.id));
            }
        };

        let span = tracing::info_span!(
            "chapter_task",
            task_id = %task.id,
            chapter_id = %chapter.chapter_id,
            index = chapter.index,
            attempts = task.attempts,
        );

        async {
            let rendered = self
                .pipeline
                .render(&task, &chapter, &self.config.worker_id)
                .await;
            let finalized = self
                .finalizer
                .upload_and_finalize(&task, &chapter, rendered)
                .await?;

            let outcome = if finalized.completion.is_success() {
                TickOutcome::Succeeded(task.id)
            } else {
                TickOutcome::Failed(task.id)
            };
            Ok::<_, ChorusError>(outcome)
        }
        .instrument(span)
        .await
    }

    /// Loop until `cancel` fires. The in-flight task always finishes first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.config.worker_id, task_type = %self.config.task_type, "Worker started");

        while !cancel.is_cancelled() {
            let pause = match self.tick().await {
                Ok(TickOutcome::Idle) => Some(self.config.poll_interval),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %e, "Worker error, cooling down");
                    Some(self.config.error_cooldown)
                }
            };
            self.set_state(WorkerState::Idle);

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.sleeper.sleep(pause) => {}
                }
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Worker stopped");
    }
}

/// Worker group handle.
/// - `request_shutdown` stops every loop after its current task
/// - `join()` waits for all of them
pub struct WorkerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn one loop per worker. Each gets a child of `cancel`.
    pub fn spawn(workers: Vec<Arc<Worker>>, cancel: &CancellationToken) -> Self {
        let group = cancel.child_token();
        let joins = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(group.child_token())))
            .collect();
        Self {
            cancel: group,
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "Worker loop terminated abnormally");
            }
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}
