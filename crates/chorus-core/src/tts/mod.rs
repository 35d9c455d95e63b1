//! TTS - 外部音声合成バックエンドとのやり取り
//!
//! - **backend**: `SynthesisBackend` port と `SynthesisError`
//! - **http**: reqwest 実装
//! - **client**: submit / poll / retry を行う `TtsClient`
//! - **wire**: JSON の形

pub mod backend;
pub mod client;
pub mod http;
pub mod wire;

pub use self::backend::{SynthesisBackend, SynthesisError};
pub use self::client::{Heartbeat, NoHeartbeat, PollPolicy, RetryPolicy, TtsClient};
pub use self::http::HttpSynthesisBackend;
pub use self::wire::{AudioOutput, JobResponse, JobStatus, SynthesisRequest};
