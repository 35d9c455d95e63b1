//! Settings - 設定の読み込み
//!
//! 優先順位: デフォルト < TOML ファイル < 環境変数。
//! 起動時に一度だけ解決し、以降は値として持ち回ります。
//!
//! 資格情報は 2 つの環境変数名を受け付けます（`CHORUS_*` が優先）:
//! - `CHORUS_TTS_API_KEY` / `RUNPOD_API_KEY`
//! - `CHORUS_TTS_ENDPOINT` / `RUNPOD_ENDPOINT`
//! - `CHORUS_DATABASE_URL` / `DATABASE_URL`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::AudioFormat;
use crate::impls::PoolConfig;
use crate::tts::{PollPolicy, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub worker: WorkerSettings,
    pub watchdog: WatchdogSettings,
    pub synthesis: SynthesisSettings,
    pub audio: AudioSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Prefix of generated worker ids; `{prefix}-{n}`.
    pub id_prefix: String,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub error_cooldown_secs: u64,
    pub max_chunk_chars: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id_prefix: "chorus-worker".into(),
            concurrency: 1,
            poll_interval_secs: 5,
            error_cooldown_secs: 30,
            max_chunk_chars: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub interval_secs: u64,
    pub lease_timeout_secs: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            lease_timeout_secs: 45 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            request_timeout_secs: 120,
            poll_interval_secs: 5,
            max_polls: 360,
            max_attempts: 3,
            retry_base_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub ffmpeg_path: PathBuf,
    pub encode_timeout_secs: u64,
    pub primary_format: AudioFormat,
    pub fallback_format: Option<AudioFormat>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            encode_timeout_secs: 600,
            primary_format: AudioFormat::M4a,
            fallback_format: Some(AudioFormat::Mp3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/artifacts"),
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 30,
            connect_retries: 5,
            connect_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub json: bool,
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info,chorus_core=debug".into(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Defaults, then `path` (if given), then the environment via `env`.
    pub fn resolve<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(env)?;
        Ok(settings)
    }

    /// `resolve` against the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::resolve(path, |key| std::env::var(key).ok())
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| env(k).filter(|v| !v.trim().is_empty()))
        };

        if let Some(v) = first(&["CHORUS_TTS_API_KEY", "RUNPOD_API_KEY"]) {
            self.synthesis.api_key = Some(v);
        }
        if let Some(v) = first(&["CHORUS_TTS_ENDPOINT", "RUNPOD_ENDPOINT"]) {
            self.synthesis.endpoint = Some(v);
        }
        if let Some(v) = first(&["CHORUS_DATABASE_URL", "DATABASE_URL"]) {
            self.database.url = Some(v);
        }
        if let Some(v) = first(&["CHORUS_STORAGE_ROOT"]) {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = first(&["CHORUS_FFMPEG_PATH"]) {
            self.audio.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = first(&["CHORUS_WORKER_CONCURRENCY"]) {
            self.worker.concurrency = parse_env("CHORUS_WORKER_CONCURRENCY", &v)?;
        }
        if let Some(v) = first(&["CHORUS_LEASE_TIMEOUT_SECS"]) {
            self.watchdog.lease_timeout_secs = parse_env("CHORUS_LEASE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = first(&["CHORUS_LOG_JSON"]) {
            self.logging.json = parse_env("CHORUS_LOG_JSON", &v)?;
        }
        Ok(())
    }

    /// Checks for everything a worker process needs.
    pub fn validate_for_worker(&self) -> Result<(), ConfigError> {
        if self.synthesis.endpoint.is_none() {
            return Err(ConfigError::Missing("synthesis endpoint (CHORUS_TTS_ENDPOINT)"));
        }
        if self.synthesis.api_key.is_none() {
            return Err(ConfigError::Missing("synthesis API key (CHORUS_TTS_API_KEY)"));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "worker.concurrency",
                message: "must be at least 1".into(),
            });
        }
        let gap = self.longest_heartbeat_gap_secs();
        if self.watchdog.lease_timeout_secs <= gap {
            return Err(ConfigError::Invalid {
                key: "watchdog.lease_timeout_secs",
                message: format!("must exceed the longest gap between lease renewals ({gap}s)"),
            });
        }
        Ok(())
    }

    /// Worst case between two lease renewals of a running task: one status
    /// request plus the wait before it, or the final encode.
    fn longest_heartbeat_gap_secs(&self) -> u64 {
        let synthesis = &self.synthesis;
        let retry_wait = synthesis
            .retry_base_delay_secs
            .saturating_mul(u64::from(synthesis.max_attempts.saturating_sub(1)));
        let wait = synthesis.poll_interval_secs.max(retry_wait);
        synthesis
            .request_timeout_secs
            .saturating_add(wait)
            .max(self.audio.encode_timeout_secs)
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("database URL (CHORUS_DATABASE_URL)"))
    }

    pub fn pool_config(&self) -> PoolConfig {
        let database = &self.database;
        PoolConfig {
            max_connections: database.max_connections,
            acquire_timeout: Duration::from_secs(database.acquire_timeout_secs),
            connect_retries: database.connect_retries,
            retry_delay: Duration::from_millis(database.connect_retry_delay_ms),
            ..PoolConfig::default()
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.synthesis.poll_interval_secs),
            max_polls: self.synthesis.max_polls,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.synthesis.max_attempts,
            base_delay: Duration::from_secs(self.synthesis.retry_base_delay_secs),
        }
    }
}

fn parse_env<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}
