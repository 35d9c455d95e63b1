//! Domain model (IDs, tasks, chapter input, artifacts, events).

pub mod artifact;
pub mod chapter;
pub mod events;
pub mod ids;
pub mod task;

pub use artifact::{ArtifactRecord, AudioFormat, ChapterCompletion, EncodedAudio};
pub use chapter::{ChapterTask, TextSource};
pub use events::PipelineEvent;
pub use ids::{ChapterId, JobId, TaskId};
pub use task::{NewTask, TaskRecord, TaskStatus, TaskType, TerminalConflict, Transition};
