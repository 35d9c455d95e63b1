//! Watchdog - lease 期限切れタスクの回収
//!
//! 一定間隔で `TaskStore::reclaim_stale` を呼び、クラッシュした worker が
//! 抱えたままのタスクを pending に戻します（attempts + 1）。
//! tick のエラーはイベントとして報告し、ループは止めません。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::PipelineEvent;
use crate::ports::{EventSink, Sleeper, StoreError, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub lease_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            lease_timeout: Duration::from_secs(45 * 60),
        }
    }
}

pub struct Watchdog {
    config: WatchdogConfig,
    store: Arc<dyn TaskStore>,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<dyn EventSink>,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        store: Arc<dyn TaskStore>,
        sleeper: Arc<dyn Sleeper>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            store,
            sleeper,
            events,
        }
    }

    pub fn config(&self) -> WatchdogConfig {
        self.config
    }

    /// One reclaim pass. Returns the number of tasks put back to pending.
    pub async fn tick(&self) -> Result<u64, StoreError> {
        let count = self.store.reclaim_stale(self.config.lease_timeout).await?;
        if count > 0 {
            self.events
                .emit(&PipelineEvent::StaleTasksReclaimed { count });
        } else {
            tracing::debug!("No stale tasks");
        }
        Ok(count)
    }

    /// First pass runs immediately, then every `interval` until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            lease_timeout_secs = self.config.lease_timeout.as_secs(),
            "Watchdog started"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.tick().await {
                self.events.emit(&PipelineEvent::WatchdogTickFailed {
                    error: e.to_string(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.sleeper.sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Watchdog stopped");
    }
}
