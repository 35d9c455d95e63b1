//! TtsClient - 1 chunk を合成して音声バイト列を返す
//!
//! # フロー
//! 1. `submit` → インライン出力ならそのまま返す
//! 2. 非同期ジョブなら `poll.interval` ごとに `status` を確認（最大 `poll.max_polls` 回）
//! 3. `COMPLETED` → base64 をデコード、または URL から取得
//!
//! 失敗は `RetryPolicy` に従って線形バックオフで再試行します。
//! `Timeout` と `Configuration` は再試行しません。
//! ポーリングと再試行の間は `Heartbeat` を呼び続けます（lease の延長用）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::backend::{SynthesisBackend, SynthesisError};
use super::wire::{AudioOutput, JobResponse, JobStatus, SynthesisRequest};
use crate::domain::PipelineEvent;
use crate::ports::{EventSink, Sleeper};

/// Async job polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    /// 5 s × 360 = 30 minutes, enough for a cold start.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 360,
        }
    }
}

/// Per-chunk retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: `base_delay * attempts` (1-indexed).
    ///
    /// - attempt 1 failed: 2s
    /// - attempt 2 failed: 4s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        self.base_delay.saturating_mul(attempts.max(1))
    }
}

/// Keeps the caller's claim alive while a chunk is in flight.
/// Called after every status poll and after every retry delay.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self);
}

pub struct NoHeartbeat;

#[async_trait]
impl Heartbeat for NoHeartbeat {
    async fn beat(&self) {}
}

enum JobState {
    Done(Vec<u8>),
    Pending,
}

pub struct TtsClient {
    backend: Arc<dyn SynthesisBackend>,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<dyn EventSink>,
    poll: PollPolicy,
    retry: RetryPolicy,
}

impl TtsClient {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        sleeper: Arc<dyn Sleeper>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            sleeper,
            events,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Synthesize one chunk, retrying transient and backend failures.
    pub async fn generate(
        &self,
        text: &str,
        voice_ref: &str,
        params: &serde_json::Value,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.generate_with_heartbeat(text, voice_ref, params, &NoHeartbeat)
            .await
    }

    /// [`generate`](Self::generate), beating `heartbeat` while it waits.
    pub async fn generate_with_heartbeat(
        &self,
        text: &str,
        voice_ref: &str,
        params: &serde_json::Value,
        heartbeat: &dyn Heartbeat,
    ) -> Result<Vec<u8>, SynthesisError> {
        let request = SynthesisRequest {
            text: text.to_string(),
            voice_ref: voice_ref.to_string(),
            params: params.clone(),
        };
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.generate_once(&request, heartbeat).await {
                Ok(audio) => return Ok(audio),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    self.events.emit(&PipelineEvent::SynthesisRetry {
                        attempt,
                        max_attempts,
                        error: e.to_string(),
                    });
                    self.sleeper.sleep(self.retry.next_delay(attempt)).await;
                    heartbeat.beat().await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn generate_once(
        &self,
        request: &SynthesisRequest,
        heartbeat: &dyn Heartbeat,
    ) -> Result<Vec<u8>, SynthesisError> {
        let submitted = self.backend.submit(request).await?;
        if let JobState::Done(audio) = self.inspect(&submitted).await? {
            return Ok(audio);
        }

        let job_id = submitted
            .id
            .ok_or_else(|| SynthesisError::Transient("response has neither output nor job id".into()))?;
        tracing::debug!(job_id = %job_id, "Synthesis job queued, polling");

        for poll in 1..=self.poll.max_polls {
            self.sleeper.sleep(self.poll.interval).await;

            let polled = self.backend.status(&job_id).await;
            heartbeat.beat().await;

            // a failed poll is not a failed job; the budget still bounds the loop
            let response = match polled {
                Ok(response) => response,
                Err(SynthesisError::Transient(e)) => {
                    tracing::warn!(job_id = %job_id, poll, error = %e, "Status poll failed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let JobState::Done(audio) = self.inspect(&response).await? {
                tracing::debug!(job_id = %job_id, polls = poll, bytes = audio.len(), "Synthesis job completed");
                return Ok(audio);
            }
        }

        Err(SynthesisError::Timeout {
            job_id,
            polls: self.poll.max_polls,
        })
    }

    async fn inspect(&self, response: &JobResponse) -> Result<JobState, SynthesisError> {
        if let Some(status) = response.status.filter(|s| s.is_failure()) {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| format!("backend reported {status:?}"));
            return Err(SynthesisError::Failed(message));
        }

        let completed = match response.status {
            Some(status) => status == JobStatus::Completed,
            None => response.output.is_some(),
        };
        if !completed {
            return Ok(JobState::Pending);
        }

        let output = response
            .output
            .as_ref()
            .ok_or_else(|| SynthesisError::Transient("completed job has no output".into()))?;
        self.extract_audio(output).await.map(JobState::Done)
    }

    async fn extract_audio(&self, output: &AudioOutput) -> Result<Vec<u8>, SynthesisError> {
        let audio = if let Some(encoded) = &output.audio_base64 {
            decode_base64(encoded)?
        } else if let Some(url) = &output.audio_url {
            self.backend.fetch_audio(url).await?
        } else {
            return Err(SynthesisError::Transient(
                "output has neither audio_base64 nor audio_url".into(),
            ));
        };

        if audio.is_empty() {
            return Err(SynthesisError::Transient("backend returned empty audio".into()));
        }
        Ok(audio)
    }
}

/// Accepts plain base64 and `data:<mime>;base64,` URLs.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, SynthesisError> {
    let raw = match encoded.split_once("base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    STANDARD
        .decode(raw.trim())
        .map_err(|e| SynthesisError::Transient(format!("invalid base64 audio: {e}")))
}
