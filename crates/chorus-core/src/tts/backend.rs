//! SynthesisBackend port - 外部音声合成サービスへのインターフェース

use async_trait::async_trait;

use super::wire::{JobResponse, SynthesisRequest};

#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// `POST /run`
    async fn submit(&self, request: &SynthesisRequest) -> Result<JobResponse, SynthesisError>;

    /// `GET /status/{id}`
    async fn status(&self, job_id: &str) -> Result<JobResponse, SynthesisError>;

    /// Download audio returned by URL.
    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// HTTP errors, malformed bodies, missing audio.
    #[error("transient synthesis error: {0}")]
    Transient(String),
    /// The backend reported the job as failed.
    #[error("synthesis job failed: {0}")]
    Failed(String),
    #[error("synthesis job {job_id} still running after {polls} polls")]
    Timeout { job_id: String, polls: u32 },
    #[error("synthesis backend misconfigured: {0}")]
    Configuration(String),
}

impl SynthesisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SynthesisError::Transient(_) | SynthesisError::Failed(_))
    }
}
