//! App - アプリケーション層
//!
//! ports を組み合わせてタスク処理を実装します。
//!
//! # 主要コンポーネント
//! - **ChapterPipeline**: テキスト → chunk → 合成 → 連結 → 変換
//! - **ArtifactFinalizer**: 保存 → 完了通知 → 終端遷移
//! - **Worker / WorkerGroup**: claim ループ（1 worker 1 タスク）
//! - **Watchdog**: lease 期限切れの回収
//! - **WorkerBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod finalizer;
pub mod pipeline;
pub mod watchdog;
pub mod worker_loop;

pub use self::builder::{BuildError, WorkerBuilder};
pub use self::finalizer::{ArtifactFinalizer, Finalized};
pub use self::pipeline::{ChapterPipeline, PipelineError, RenderedChapter};
pub use self::watchdog::{Watchdog, WatchdogConfig};
pub use self::worker_loop::{TickOutcome, Worker, WorkerConfig, WorkerGroup, WorkerState};
