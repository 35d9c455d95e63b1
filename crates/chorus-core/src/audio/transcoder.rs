//! Transcoder - 外部エンコーダ（ffmpeg）で配布用フォーマットに変換する
//!
//! - 1 回の変換ごとに一時ディレクトリを作り、`TempDir` の drop で必ず消す
//! - サブプロセスは wall-clock timeout 付き（超過したら kill）
//! - primary が失敗したら fallback を試す。両方失敗したときだけタスク失敗

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::{AudioFormat, EncodedAudio, PipelineEvent};
use crate::ports::EventSink;

const STDERR_TAIL_BYTES: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to start encoder '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("encoder I/O failed: {0}")]
    Io(String),
    #[error("{format} encode timed out after {timeout:?}")]
    TimedOut {
        format: AudioFormat,
        timeout: Duration,
    },
    #[error("{format} encode exited with {status}: {stderr}")]
    Failed {
        format: AudioFormat,
        status: String,
        stderr: String,
    },
    #[error("{format} encode produced no output")]
    EmptyOutput { format: AudioFormat },
    #[error("primary encode failed ({primary}); fallback failed ({fallback})")]
    Exhausted {
        primary: Box<TranscodeError>,
        fallback: Box<TranscodeError>,
    },
}

impl From<std::io::Error> for TranscodeError {
    fn from(e: std::io::Error) -> Self {
        TranscodeError::Io(e.to_string())
    }
}

/// PCM WAV in, `format` bytes out.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>, TranscodeError>;
}

/// Runs `ffmpeg` (or a compatible binary) once per encode.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    timeout: Duration,
    temp_root: Option<PathBuf>,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            temp_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chorus-encode-");
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

/// Codec arguments placed between the input and the output path.
pub fn codec_args(format: AudioFormat) -> &'static [&'static str] {
    match format {
        AudioFormat::Mp3 => &["-codec:a", "libmp3lame", "-b:a", "128k"],
        AudioFormat::M4a => &["-codec:a", "aac", "-b:a", "128k", "-movflags", "+faststart"],
        AudioFormat::Wav => &["-codec:a", "pcm_s16le"],
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>, TranscodeError> {
        let dir = self.scratch_dir()?;
        let input = dir.path().join("input.wav");
        let output = dir.path().join(format!("output.{}", format.extension()));
        tokio::fs::write(&input, pcm).await?;

        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(&input)
            .args(codec_args(format))
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| TranscodeError::Spawn {
            program: self.program.display().to_string(),
            message: e.to_string(),
        })?;

        // dropping the wait future on timeout kills the child
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TranscodeError::TimedOut {
                    format,
                    timeout: self.timeout,
                });
            }
        };

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                format,
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }

        let bytes = tokio::fs::read(&output).await?;
        if bytes.is_empty() {
            return Err(TranscodeError::EmptyOutput { format });
        }
        tracing::debug!(%format, input_bytes = pcm.len(), output_bytes = bytes.len(), "Encoded audio");
        Ok(bytes)
    }
}

/// Primary format with an optional fallback.
pub struct Transcoder {
    encoder: Arc<dyn Encoder>,
    primary: AudioFormat,
    fallback: Option<AudioFormat>,
    events: Arc<dyn EventSink>,
}

impl Transcoder {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        primary: AudioFormat,
        fallback: Option<AudioFormat>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            encoder,
            primary,
            fallback: fallback.filter(|f| *f != primary),
            events,
        }
    }

    pub async fn encode_with_fallback(&self, pcm: &[u8]) -> Result<EncodedAudio, TranscodeError> {
        let primary_err = match self.encoder.encode(pcm, self.primary).await {
            Ok(bytes) => {
                return Ok(EncodedAudio {
                    bytes,
                    format: self.primary,
                });
            }
            Err(e) => e,
        };

        let Some(fallback) = self.fallback else {
            return Err(primary_err);
        };

        self.events.emit(&PipelineEvent::TranscodeFallback {
            from: self.primary,
            to: fallback,
            error: primary_err.to_string(),
        });

        match self.encoder.encode(pcm, fallback).await {
            Ok(bytes) => Ok(EncodedAudio {
                bytes,
                format: fallback,
            }),
            Err(fallback_err) => Err(TranscodeError::Exhausted {
                primary: Box::new(primary_err),
                fallback: Box::new(fallback_err),
            }),
        }
    }
}
