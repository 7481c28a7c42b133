//! Speech-to-text fallback for videos that carry no caption track.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::subtitle::{format_timestamp, render_cues};
use crate::error::ExtractError;

/// One recognized stretch of speech, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;
    async fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, ExtractError>;
}

/// Tries each stage in order and keeps the first that succeeds, e.g. large to small models.
pub struct FallbackTranscriber {
    stages: Vec<Arc<dyn Transcriber>>,
}

impl FallbackTranscriber {
    pub fn new(stages: Vec<Arc<dyn Transcriber>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Transcriber for FallbackTranscriber {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, ExtractError> {
        let mut last_error = ExtractError::Tool("no transcription model available".into());
        for stage in &self.stages {
            match stage.transcribe(audio).await {
                Ok(segments) => {
                    info!("Transcribed {} with {} ({} segments)", audio.display(), stage.name(), segments.len());
                    return Ok(segments);
                }
                Err(e) => {
                    warn!("Transcription with {} failed: {}", stage.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Renders segments in the same `[start] - [end] text` layout as converted captions.
pub fn segments_to_text(segments: &[Segment]) -> String {
    let cues: Vec<String> = segments
        .iter()
        .filter_map(|segment| {
            let text = segment.text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then(|| {
                format!(
                    "[{}] - [{}] {}",
                    format_timestamp(segment.start),
                    format_timestamp(segment.end),
                    text
                )
            })
        })
        .collect();
    render_cues(&cues)
}

/// Writes the transcript of `audio` to `<dir>/<stem>.txt`. `None` when no speech was recognized.
pub async fn transcribe_to_file(
    transcriber: &dyn Transcriber,
    audio: &Path,
    dir: &Path,
    stem: &str,
) -> Result<Option<PathBuf>, ExtractError> {
    let segments = transcriber.transcribe(audio).await?;
    let text = segments_to_text(&segments);
    if text.is_empty() {
        return Ok(None);
    }

    let path = dir.join(format!("{}.txt", stem));
    tokio::fs::write(&path, text).await?;
    Ok(Some(path))
}
