//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（PostgreSQL, オブジェクトストレージ, ジョブ所有者,
//! 時刻）へのインターフェースで、実装の詳細を隠蔽します。
//!
//! - TaskStore がタスク状態の正本
//! - ArtifactStore は音声・テキストの Blob
//! - CompletionSink はジョブ所有者への完了通知

pub mod artifact_store;
pub mod clock;
pub mod completion_sink;
pub mod event_sink;
pub mod task_store;

pub use self::artifact_store::{ArtifactStore, StorageError, StoredObject};
pub use self::clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use self::completion_sink::{CompletionError, CompletionSink};
pub use self::event_sink::{EventSink, RecordingEventSink, TracingEventSink};
pub use self::task_store::{QueueCounts, StoreError, TaskStore};
