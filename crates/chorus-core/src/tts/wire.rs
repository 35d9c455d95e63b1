//! Synthesis backend wire format.

use serde::{Deserialize, Serialize};

/// Body of `POST /run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_ref: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Job state reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut)
    }
}

/// Response of both `POST /run` and `GET /status/{id}`.
///
/// A synchronous backend answers `/run` with `output` directly and no `id`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub output: Option<AudioOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AudioOutput {
    #[serde(default, alias = "audio")]
    pub audio_base64: Option<String>,
    #[serde(default, alias = "url")]
    pub audio_url: Option<String>,
}
