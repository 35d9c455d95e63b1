use thiserror::Error;

use crate::app::{BuildError, PipelineError};
use crate::config::ConfigError;
use crate::domain::TaskId;
use crate::ports::{StorageError, StoreError};

/// Loop-level failure. Per-task failures are recorded on the task instead.
#[derive(Debug, Error)]
pub enum ChorusError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("worker panicked while processing task_id={task_id}")]
    WorkerPanicked { task_id: TaskId },

    #[error("processing of task_id={task_id} was aborted: {message}")]
    WorkerAborted { task_id: TaskId, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
