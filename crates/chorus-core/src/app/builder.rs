//! WorkerBuilder - Worker の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 必須コンポーネント（store, artifacts, sink, backend, encoder）を setter で受け取る
//! - build() 時に不足をまとめてチェックし、BuildError で全部返す
//! - 省略可能なもの（sleeper, events, 各 policy）はデフォルトを使う
//!
//! `Clone` なので、同じ部品から worker_id 違いの Worker を何個でも作れます。

use std::sync::Arc;
use std::time::Duration;

use super::finalizer::ArtifactFinalizer;
use super::pipeline::ChapterPipeline;
use super::worker_loop::{Worker, WorkerConfig};
use crate::audio::{Encoder, Transcoder};
use crate::domain::{AudioFormat, TaskType};
use crate::ports::{
    ArtifactStore, CompletionSink, EventSink, Sleeper, TaskStore, TokioSleeper, TracingEventSink,
};
use crate::text::TextChunker;
use crate::tts::{PollPolicy, RetryPolicy, SynthesisBackend, TtsClient};

/// BuildError はワイヤリング時のエラー
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Missing worker components: {0:?}")]
    MissingComponents(Vec<&'static str>),
}

#[derive(Clone)]
pub struct WorkerBuilder {
    config: WorkerConfig,
    store: Option<Arc<dyn TaskStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn CompletionSink>>,
    backend: Option<Arc<dyn SynthesisBackend>>,
    encoder: Option<Arc<dyn Encoder>>,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<dyn EventSink>,
    max_chunk_chars: usize,
    poll: PollPolicy,
    retry: RetryPolicy,
    primary_format: AudioFormat,
    fallback_format: Option<AudioFormat>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
            store: None,
            artifacts: None,
            sink: None,
            backend: None,
            encoder: None,
            sleeper: Arc::new(TokioSleeper),
            events: Arc::new(TracingEventSink),
            max_chunk_chars: 300,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
            primary_format: AudioFormat::M4a,
            fallback_format: Some(AudioFormat::Mp3),
        }
    }

    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.config.worker_id = id.into();
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.config.task_type = task_type;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn error_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.error_cooldown = cooldown;
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn completion_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn synthesis_backend(mut self, backend: Arc<dyn SynthesisBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn max_chunk_chars(mut self, max: usize) -> Self {
        self.max_chunk_chars = max;
        self
    }

    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn formats(mut self, primary: AudioFormat, fallback: Option<AudioFormat>) -> Self {
        self.primary_format = primary;
        self.fallback_format = fallback;
        self
    }

    /// Wire a `Worker`.
    ///
    /// # 検証
    /// - 必須コンポーネントがすべて設定されているか
    /// - 不足があれば BuildError::MissingComponents で名前を全部返す
    pub fn build(self) -> Result<Worker, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("task store");
        }
        if self.artifacts.is_none() {
            missing.push("artifact store");
        }
        if self.sink.is_none() {
            missing.push("completion sink");
        }
        if self.backend.is_none() {
            missing.push("synthesis backend");
        }
        if self.encoder.is_none() {
            missing.push("encoder");
        }

        let (Some(store), Some(artifacts), Some(sink), Some(backend), Some(encoder)) = (
            self.store,
            self.artifacts,
            self.sink,
            self.backend,
            self.encoder,
        ) else {
            return Err(BuildError::MissingComponents(missing));
        };

        let tts = TtsClient::new(backend, self.sleeper.clone(), self.events.clone())
            .with_poll_policy(self.poll)
            .with_retry_policy(self.retry);
        let transcoder = Transcoder::new(
            encoder,
            self.primary_format,
            self.fallback_format,
            self.events.clone(),
        );
        let pipeline = ChapterPipeline::new(
            TextChunker::new(self.max_chunk_chars),
            tts,
            transcoder,
            artifacts.clone(),
            store.clone(),
            self.events.clone(),
        );
        let finalizer = ArtifactFinalizer::new(artifacts, sink, store.clone(), self.events.clone());

        Ok(Worker::new(
            self.config,
            store,
            pipeline,
            finalizer,
            self.sleeper,
            self.events,
        ))
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryTaskStore, MemoryCompletionSink, ObjectArtifactStore};
    use crate::testing::Fixture;

    #[test]
    fn build_success() {
        let worker = Fixture::new().builder().worker_id("w-7").build().unwrap();
        assert_eq!(worker.id(), "w-7");
    }

    #[test]
    fn build_reports_every_missing_component() {
        let result = WorkerBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .completion_sink(Arc::new(MemoryCompletionSink::new()))
            .build();

        assert!(matches!(
            result,
            Err(BuildError::MissingComponents(missing))
                if missing == vec!["artifact store", "synthesis backend", "encoder"]
        ));
    }

    #[test]
    fn empty_builder_misses_everything() {
        let result = WorkerBuilder::default()
            .artifacts(Arc::new(ObjectArtifactStore::in_memory()))
            .build();
        match result {
            Err(BuildError::MissingComponents(missing)) => assert_eq!(missing.len(), 4),
            Ok(_) => panic!("expected a build error"),
        }
    }

    #[test]
    fn cloned_builders_produce_distinct_workers() {
        let builder = Fixture::new().builder();
        let a = builder.clone().worker_id("a").build().unwrap();
        let b = builder.worker_id("b").build().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
