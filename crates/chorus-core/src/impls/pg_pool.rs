//! PostgreSQL 接続プール
//!
//! worker と DB が同時に起動することが多いため、最初の接続は
//! 指数バックオフで数回やり直します。

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument, warn};

use crate::ports::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Connection attempts after the first failure.
    pub connect_retries: u32,
    /// Delay before the first retry. Doubles per retry up to `max_retry_delay`.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            connect_retries: 5,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(8),
        }
    }
}

impl PoolConfig {
    /// Delay before retry number `retry` (0-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_retry_delay)
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
    }
}

#[instrument(skip(url))]
pub async fn create_pool(url: &str, config: &PoolConfig) -> Result<PgPool, StoreError> {
    let mut retry = 0;
    loop {
        match config.options().connect(url).await {
            Ok(pool) => {
                info!(
                    max_connections = config.max_connections,
                    retries = retry,
                    "PostgreSQL connection pool established"
                );
                return Ok(pool);
            }
            Err(e) if retry < config.connect_retries => {
                let delay = config.backoff(retry);
                retry += 1;
                warn!(
                    error = %e,
                    retry,
                    of = config.connect_retries,
                    delay_ms = delay.as_millis(),
                    "PostgreSQL connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(StoreError::ConnectionFailed(format!(
                    "{e} (gave up after {retry} retries)"
                )));
            }
        }
    }
}
