//! Artifact model: the finished audio and the completion record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::{ChapterId, JobId, TaskId};

/// Distributable audio formats the transcoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    M4a,
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m4a" | "aac" => Ok(AudioFormat::M4a),
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            other => Err(format!("Invalid audio format: {}", other)),
        }
    }
}

/// Transcoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Metadata of a persisted artifact; also stored as the task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub chapter_id: ChapterId,
    pub job_id: JobId,
    pub task_id: TaskId,
    pub storage_path: String,
    pub content_type: String,
    pub format: AudioFormat,
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// Public URL when the artifact store is configured with one.
    #[serde(default)]
    pub url: Option<String>,
}

/// Payload of the single completion call.
///
/// Success and failure share one shape: `artifact` is `Some` on success and
/// `None` on failure, in which case `error` carries the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterCompletion {
    pub chapter_id: ChapterId,
    pub job_id: JobId,
    pub task_id: TaskId,
    pub artifact: Option<ArtifactRecord>,
    pub error: Option<String>,
}

impl ChapterCompletion {
    pub fn succeeded(artifact: ArtifactRecord) -> Self {
        Self {
            chapter_id: artifact.chapter_id,
            job_id: artifact.job_id,
            task_id: artifact.task_id,
            artifact: Some(artifact),
            error: None,
        }
    }

    pub fn failed(
        chapter_id: ChapterId,
        job_id: JobId,
        task_id: TaskId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            chapter_id,
            job_id,
            task_id,
            artifact: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact.is_some()
    }
}
