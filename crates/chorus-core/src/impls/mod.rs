//! Impls - ports の実装
//!
//! # 開発用・テスト用
//! - **InMemoryTaskStore**: タスクテーブル
//! - **MemoryCompletionSink**: 完了通知の記録
//! - **ObjectArtifactStore::in_memory**
//!
//! # 本番用
//! - **PgTaskStore** / **PgCompletionSink**: PostgreSQL
//! - **ObjectArtifactStore::local**: ローカル FS

pub mod memory_completion;
pub mod memory_store;
pub mod object_artifacts;
pub mod pg_completion;
pub mod pg_pool;
pub mod pg_store;

pub use self::memory_completion::MemoryCompletionSink;
pub use self::memory_store::InMemoryTaskStore;
pub use self::object_artifacts::ObjectArtifactStore;
pub use self::pg_completion::PgCompletionSink;
pub use self::pg_pool::{PoolConfig, create_pool};
pub use self::pg_store::PgTaskStore;
