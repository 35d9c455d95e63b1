use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ChapterCompletion, ChapterId};
use crate::ports::{CompletionError, CompletionSink};

/// In-process completion sink keyed by chapter id.
///
/// Same upsert rule as the Postgres sink: a failure does not replace a success.
#[derive(Default)]
pub struct MemoryCompletionSink {
    latest: Mutex<HashMap<ChapterId, ChapterCompletion>>,
    calls: Mutex<Vec<ChapterCompletion>>,
}

impl MemoryCompletionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, chapter_id: ChapterId) -> Option<ChapterCompletion> {
        self.latest.lock().await.get(&chapter_id).cloned()
    }

    /// Every call received, in order.
    pub async fn calls(&self) -> Vec<ChapterCompletion> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CompletionSink for MemoryCompletionSink {
    async fn complete(&self, completion: &ChapterCompletion) -> Result<(), CompletionError> {
        self.calls.lock().await.push(completion.clone());

        let mut latest = self.latest.lock().await;
        let keep_existing = latest
            .get(&completion.chapter_id)
            .is_some_and(|existing| existing.is_success() && !completion.is_success());
        if !keep_existing {
            latest.insert(completion.chapter_id, completion.clone());
        }
        Ok(())
    }
}
