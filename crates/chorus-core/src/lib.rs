//! chorus-core
//!
//! Task queue and worker pipeline that renders chapter text into audio.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, chapter, artifact, events）
//! - **ports**: 抽象化レイヤー（TaskStore, ArtifactStore, CompletionSink, EventSink, Clock/Sleeper）
//! - **impls**: ports の実装（in-memory, PostgreSQL, object_store）
//! - **text**: テキストの chunk 分割
//! - **tts**: 音声合成バックエンドのクライアント（submit / poll / retry）
//! - **audio**: WAV の連結と ffmpeg による変換
//! - **app**: パイプライン、Worker ループ、Watchdog、Builder
//! - **config**: 設定（TOML + 環境変数）
//! - **error**: ループ単位のエラー型

pub mod app;
pub mod audio;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod text;
pub mod tts;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ChorusError;
