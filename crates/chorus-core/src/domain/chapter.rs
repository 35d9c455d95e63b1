//! Input of a `chorus.audio.chapter.v1` task.

use serde::{Deserialize, Serialize};

use super::artifact::AudioFormat;
use super::ids::{ChapterId, JobId};

/// Where the chapter text lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextSource {
    /// Text carried in the task row itself.
    Inline { text: String },
    /// Text stored by the text-producing service; fetched as UTF-8 bytes.
    Artifact { path: String },
}

/// One chapter/document to render. Created by the job-creation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterTask {
    pub chapter_id: ChapterId,
    pub job_id: JobId,
    pub index: u32,
    #[serde(default)]
    pub title: Option<String>,
    pub source: TextSource,
    pub voice_ref: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Overrides the default storage path (without extension).
    #[serde(default)]
    pub output_path: Option<String>,
}

impl ChapterTask {
    /// `audio/{job}/{index:03}-{chapter}.{ext}` unless `output_path` is set.
    pub fn storage_path(&self, format: AudioFormat) -> String {
        let stem = match &self.output_path {
            Some(path) => path.trim_end_matches('/').to_string(),
            None => format!(
                "audio/{}/{:03}-{}",
                self.job_id.to_db(),
                self.index,
                self.chapter_id.to_db()
            ),
        };
        format!("{stem}.{}", format.extension())
    }
}
