//! Test doubles and fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use crate::app::{ArtifactFinalizer, ChapterPipeline, Worker, WorkerBuilder};
use crate::audio::{Encoder, TranscodeError, Transcoder, parse_header};
use crate::domain::{
    AudioFormat, ChapterId, ChapterTask, JobId, NewTask, TaskId, TaskRecord, TaskType, TextSource,
    Transition,
};
use crate::impls::{InMemoryTaskStore, MemoryCompletionSink, ObjectArtifactStore};
use crate::ports::{
    ManualClock, QueueCounts, RecordingEventSink, RecordingSleeper, StoreError, TaskStore,
};
use crate::text::TextChunker;
use crate::tts::{
    AudioOutput, JobResponse, JobStatus, PollPolicy, RetryPolicy, SynthesisBackend,
    SynthesisError, SynthesisRequest, TtsClient,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Poll `cond` until it holds; panics after 10 s of wall time.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !cond().await {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 10s");
}

// ---- WAV fixtures --------------------------------------------------------

pub fn pcm16_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for s in samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

pub fn float_wav(sample_rate: u32, channels: u16, samples: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for s in samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

/// Samples of a 16-bit PCM WAV.
pub fn pcm16_samples(bytes: &[u8]) -> Vec<i16> {
    let header = parse_header(bytes).expect("not a WAV");
    assert!(header.is_pcm16(), "not 16-bit PCM: {header:?}");
    header
        .payload(bytes)
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

// ---- Domain fixtures -----------------------------------------------------

pub fn chapter_task(text: &str) -> ChapterTask {
    ChapterTask {
        chapter_id: ChapterId::generate(),
        job_id: JobId::generate(),
        index: 0,
        title: None,
        source: TextSource::Inline { text: text.into() },
        voice_ref: "narrator".into(),
        params: serde_json::Value::Null,
        output_path: None,
    }
}

pub fn new_chapter_task(chapter: &ChapterTask, sequence: i32) -> NewTask {
    NewTask {
        job_id: chapter.job_id,
        task_type: TaskType::audio_chapter(),
        sequence,
        input: serde_json::to_value(chapter).unwrap(),
    }
}

// ---- Synthesis backends --------------------------------------------------

pub fn pending(id: &str) -> JobResponse {
    JobResponse {
        id: Some(id.into()),
        status: Some(JobStatus::InQueue),
        ..Default::default()
    }
}

pub fn completed_inline(id: Option<&str>, audio: &[u8]) -> JobResponse {
    JobResponse {
        id: id.map(str::to_string),
        status: Some(JobStatus::Completed),
        output: Some(AudioOutput {
            audio_base64: Some(base64::engine::general_purpose::STANDARD.encode(audio)),
            audio_url: None,
        }),
        error: None,
    }
}

pub fn completed_url(id: &str, url: &str) -> JobResponse {
    JobResponse {
        id: Some(id.into()),
        status: Some(JobStatus::Completed),
        output: Some(AudioOutput {
            audio_base64: None,
            audio_url: Some(url.into()),
        }),
        error: None,
    }
}

pub fn failed(id: &str, message: &str) -> JobResponse {
    JobResponse {
        id: Some(id.into()),
        status: Some(JobStatus::Failed),
        output: None,
        error: Some(message.into()),
    }
}

/// Replays queued responses in order.
#[derive(Default)]
pub struct ScriptedBackend {
    submits: Mutex<VecDeque<Result<JobResponse, SynthesisError>>>,
    statuses: Mutex<VecDeque<Result<JobResponse, SynthesisError>>>,
    audio: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<SynthesisRequest>>,
    status_calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(self, response: Result<JobResponse, SynthesisError>) -> Self {
        lock(&self.submits).push_back(response);
        self
    }

    pub fn status(self, response: Result<JobResponse, SynthesisError>) -> Self {
        lock(&self.statuses).push_back(response);
        self
    }

    pub fn audio(mut self, url: &str, bytes: &[u8]) -> Self {
        self.audio.insert(url.into(), bytes.to_vec());
        self
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        lock(&self.requests).clone()
    }

    pub fn submit_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    async fn submit(&self, request: &SynthesisRequest) -> Result<JobResponse, SynthesisError> {
        lock(&self.requests).push(request.clone());
        lock(&self.submits)
            .pop_front()
            .unwrap_or_else(|| Err(SynthesisError::Transient("submit script exhausted".into())))
    }

    async fn status(&self, _job_id: &str) -> Result<JobResponse, SynthesisError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.statuses)
            .pop_front()
            .unwrap_or_else(|| Err(SynthesisError::Transient("status script exhausted".into())))
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, SynthesisError> {
        self.audio
            .get(url)
            .cloned()
            .ok_or_else(|| SynthesisError::Transient(format!("no audio at {url}")))
    }
}

/// Synchronous backend: each chunk becomes a one-sample 16 kHz WAV whose
/// sample is the chunk's character count.
#[derive(Default)]
pub struct EchoWavBackend {
    texts: Mutex<Vec<String>>,
    fail_on: Mutex<HashSet<String>>,
    panic_on: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl EchoWavBackend {
    pub fn texts(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }

    pub fn fail_on(&self, text: &str) {
        lock(&self.fail_on).insert(text.into());
    }

    pub fn panic_on(&self, text: &str) {
        lock(&self.panic_on).insert(text.into());
    }

    /// The next submit waits until the returned `Notify` fires.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *lock(&self.gate) = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl SynthesisBackend for EchoWavBackend {
    async fn submit(&self, request: &SynthesisRequest) -> Result<JobResponse, SynthesisError> {
        lock(&self.texts).push(request.text.clone());

        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if lock(&self.panic_on).contains(&request.text) {
            panic!("echo backend told to panic on {:?}", request.text);
        }
        if lock(&self.fail_on).contains(&request.text) {
            return Ok(failed("echo", "CUDA out of memory"));
        }

        let sample = request.text.chars().count() as i16;
        Ok(completed_inline(None, &pcm16_wav(16_000, 1, &[sample])))
    }

    async fn status(&self, job_id: &str) -> Result<JobResponse, SynthesisError> {
        Err(SynthesisError::Configuration(format!(
            "echo backend has no job {job_id}"
        )))
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError::Configuration(format!("echo backend cannot fetch {url}")))
    }
}

// ---- Encoder -------------------------------------------------------------

/// Returns its input unchanged, or fails for the configured formats.
#[derive(Default)]
pub struct FakeEncoder {
    failing: HashSet<AudioFormat>,
    calls: Mutex<Vec<AudioFormat>>,
    last_input: Mutex<Option<Vec<u8>>>,
}

impl FakeEncoder {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_on(formats: &[AudioFormat]) -> Self {
        Self {
            failing: formats.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<AudioFormat> {
        lock(&self.calls).clone()
    }

    pub fn last_input(&self) -> Option<Vec<u8>> {
        lock(&self.last_input).clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>, TranscodeError> {
        lock(&self.calls).push(format);
        *lock(&self.last_input) = Some(pcm.to_vec());
        if self.failing.contains(&format) {
            return Err(TranscodeError::Failed {
                format,
                status: "exit status: 1".into(),
                stderr: format!("Unknown encoder for {format}"),
            });
        }
        Ok(pcm.to_vec())
    }
}

// ---- Task store ----------------------------------------------------------

/// In-memory store whose first N claims / reclaims fail.
pub struct FlakyStore {
    inner: Arc<InMemoryTaskStore>,
    claim_failures: AtomicU32,
    reclaim_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryTaskStore>) -> Self {
        Self {
            inner,
            claim_failures: AtomicU32::new(0),
            reclaim_failures: AtomicU32::new(0),
        }
    }

    pub fn failing_claims(self, n: u32) -> Self {
        self.claim_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_reclaims(self, n: u32) -> Self {
        self.reclaim_failures.store(n, Ordering::SeqCst);
        self
    }

    fn trip(counter: &AtomicU32) -> Result<(), StoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::QueryFailed("connection reset by peer".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn enqueue(&self, task: NewTask) -> Result<TaskId, StoreError> {
        self.inner.enqueue(task).await
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        task_type: &TaskType,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        Self::trip(&self.claim_failures)?;
        self.inner.claim_next(worker_id, task_type, limit).await
    }

    async fn renew_lease(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError> {
        self.inner.renew_lease(task_id, worker_id).await
    }

    async fn mark_complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<Transition, StoreError> {
        self.inner.mark_complete(task_id, result).await
    }

    async fn mark_failed(&self, task_id: TaskId, error: &str) -> Result<Transition, StoreError> {
        self.inner.mark_failed(task_id, error).await
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64, StoreError> {
        Self::trip(&self.reclaim_failures)?;
        self.inner.reclaim_stale(lease_timeout).await
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(task_id).await
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        self.inner.counts_by_status().await
    }
}

// ---- Fixture -------------------------------------------------------------

/// Every collaborator of the pipeline, in memory.
pub struct Fixture {
    pub clock: ManualClock,
    pub store: Arc<InMemoryTaskStore>,
    pub artifacts: Arc<ObjectArtifactStore>,
    pub sink: Arc<MemoryCompletionSink>,
    pub backend: Arc<EchoWavBackend>,
    pub encoder: Arc<FakeEncoder>,
    pub events: Arc<RecordingEventSink>,
    pub sleeper: RecordingSleeper,
    max_chunk_chars: usize,
    claim_failures: u32,
    sequence: AtomicI32,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = ManualClock::new(start_time());
        Self {
            store: Arc::new(InMemoryTaskStore::with_clock(Arc::new(clock.clone()))),
            clock,
            artifacts: Arc::new(ObjectArtifactStore::in_memory()),
            sink: Arc::new(MemoryCompletionSink::new()),
            backend: Arc::new(EchoWavBackend::default()),
            encoder: Arc::new(FakeEncoder::succeeding()),
            events: Arc::new(RecordingEventSink::new()),
            sleeper: RecordingSleeper::new(),
            max_chunk_chars: 300,
            claim_failures: 0,
            sequence: AtomicI32::new(0),
        }
    }

    pub fn max_chunk_chars(mut self, max: usize) -> Self {
        self.max_chunk_chars = max;
        self
    }

    pub fn encoder_failing_on(mut self, formats: &[AudioFormat]) -> Self {
        self.encoder = Arc::new(FakeEncoder::failing_on(formats));
        self
    }

    /// Workers built afterwards see `n` failing claims.
    pub fn failing_claims(mut self, n: u32) -> Self {
        self.claim_failures = n;
        self
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }

    fn poll_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(5),
            max_polls: 3,
        }
    }

    fn task_store(&self) -> Arc<dyn TaskStore> {
        if self.claim_failures > 0 {
            Arc::new(FlakyStore::new(self.store.clone()).failing_claims(self.claim_failures))
        } else {
            self.store.clone()
        }
    }

    pub fn builder(&self) -> WorkerBuilder {
        WorkerBuilder::new()
            .store(self.task_store())
            .artifacts(self.artifacts.clone())
            .completion_sink(self.sink.clone())
            .synthesis_backend(self.backend.clone())
            .encoder(self.encoder.clone())
            .sleeper(Arc::new(self.sleeper.clone()))
            .events(self.events.clone())
            .max_chunk_chars(self.max_chunk_chars)
            .poll_policy(Self::poll_policy())
            .retry_policy(Self::retry_policy())
            .formats(AudioFormat::M4a, Some(AudioFormat::Mp3))
    }

    pub fn worker(&self, id: &str) -> Worker {
        self.builder().worker_id(id).build().unwrap()
    }

    pub fn pipeline(&self) -> ChapterPipeline {
        let tts = TtsClient::new(
            self.backend.clone(),
            Arc::new(self.sleeper.clone()),
            self.events.clone(),
        )
        .with_poll_policy(Self::poll_policy())
        .with_retry_policy(Self::retry_policy());
        let transcoder = Transcoder::new(
            self.encoder.clone(),
            AudioFormat::M4a,
            Some(AudioFormat::Mp3),
            self.events.clone(),
        );
        ChapterPipeline::new(
            TextChunker::new(self.max_chunk_chars),
            tts,
            transcoder,
            self.artifacts.clone(),
            self.store.clone(),
            self.events.clone(),
        )
    }

    pub fn finalizer(&self) -> ArtifactFinalizer {
        ArtifactFinalizer::new(
            self.artifacts.clone(),
            self.sink.clone(),
            self.store.clone(),
            self.events.clone(),
        )
    }

    pub async fn enqueue_raw(&self, input: serde_json::Value) -> TaskId {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.store
            .enqueue(NewTask {
                job_id: JobId::generate(),
                task_type: TaskType::audio_chapter(),
                sequence,
                input,
            })
            .await
            .unwrap()
    }

    pub async fn enqueue(&self, chapter: &ChapterTask) -> TaskId {
        self.enqueue_raw(serde_json::to_value(chapter).unwrap()).await
    }

    pub async fn enqueue_raw_and_claim(&self, input: serde_json::Value) -> TaskRecord {
        let id = self.enqueue_raw(input).await;
        let mut claimed = self
            .store
            .claim_next("w1", &TaskType::audio_chapter(), 1)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        let task = claimed.remove(0);
        assert_eq!(task.id, id);
        task
    }

    pub async fn enqueue_and_claim(&self, chapter: &ChapterTask) -> TaskRecord {
        self.enqueue_raw_and_claim(serde_json::to_value(chapter).unwrap())
            .await
    }
}
