use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ExtractError;
use crate::schedule::types::TaskId;

pub mod subtitle;
pub mod transcribe;
#[cfg(feature = "whisper")]
pub mod whisper;
pub mod ytdlp;

pub use transcribe::{FallbackTranscriber, Transcriber};
pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub task_id: TaskId,
    pub url: String,
}

impl ExtractRequest {
    pub fn new(task_id: TaskId, url: impl Into<String>) -> Self {
        Self { task_id, url: url.into() }
    }

    /// Artifact base name: `<task_id>_<YYYYMMDD>`. Never derived from video metadata.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.task_id, Utc::now().format("%Y%m%d"))
    }
}

/// Result of a successful extraction. Paths point at files already moved into the download directory.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub title: String,
    pub description: Option<String>,
    pub audio_path: PathBuf,
    pub subtitle_path: Option<PathBuf>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractRequest) -> Result<Extraction, ExtractError>;
}
