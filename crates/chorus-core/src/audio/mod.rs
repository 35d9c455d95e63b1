//! Audio - WAV の解析・連結と配布フォーマットへの変換

pub mod assembler;
pub mod transcoder;
pub mod wav;

pub use self::assembler::{concatenate, normalize_to_pcm};
pub use self::transcoder::{Encoder, FfmpegEncoder, TranscodeError, Transcoder};
pub use self::wav::{WavHeader, parse_header};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("none of the {0} audio chunks could be parsed")]
    NoValidChunks(usize),
    #[error("failed to write WAV: {0}")]
    Write(#[from] hound::Error),
}
