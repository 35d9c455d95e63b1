//! CompletionSink port - ジョブ所有者への完了通知
//!
//! 成功と失敗で同じ API を使います（`artifact` の有無で区別）。
//! 実装は chapter_id をキーにした upsert で、何度呼ばれても安全です。

use async_trait::async_trait;

use crate::domain::ChapterCompletion;

#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn complete(&self, completion: &ChapterCompletion) -> Result<(), CompletionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion rejected: {0}")]
    Rejected(String),
    #[error("completion call failed: {0}")]
    Failed(String),
}
