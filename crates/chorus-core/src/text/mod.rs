//! Text preparation for synthesis.

pub mod chunker;

pub use self::chunker::{TextChunker, split};
