use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use tokio::process::Command;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::transcribe::{FallbackTranscriber, Segment, Transcriber};
use crate::error::ExtractError;

// largest first; a model that fails to load or run hands over to the next
const MODEL_FILES: [(&str, &str); 4] = [
    ("large-v3", "ggml-large-v3.bin"),
    ("medium", "ggml-medium.bin"),
    ("small", "ggml-small.bin"),
    ("base", "ggml-base.bin"),
];

const SAMPLE_RATE: &str = "16000";

/// Builds the model ladder from the ggml files present in `model_dir`.
pub fn model_ladder(model_dir: &Path, language: Option<String>) -> FallbackTranscriber {
    let stages = MODEL_FILES
        .iter()
        .map(|(name, file)| (*name, model_dir.join(file)))
        .filter(|(_, path)| path.exists())
        .map(|(name, path)| {
            info!("Found whisper model {} at {}", name, path.display());
            Arc::new(WhisperTranscriber::new(name, path, language.clone())) as Arc<dyn Transcriber>
        })
        .collect();
    FallbackTranscriber::new(stages)
}

pub struct WhisperTranscriber {
    name: String,
    model_path: PathBuf,
    /// `None` lets whisper detect the language.
    language: Option<String>,
    threads: i32,
}

impl WhisperTranscriber {
    pub fn new(name: &str, model_path: PathBuf, language: Option<String>) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8) as i32;
        Self {
            name: name.to_string(),
            model_path,
            language,
            threads,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, ExtractError> {
        let samples = decode_pcm(audio).await?;
        let model_path = self.model_path.clone();
        let language = self.language.clone();
        let threads = self.threads;

        tokio::task::spawn_blocking(move || run_model(&model_path, language.as_deref(), threads, &samples))
            .await
            .map_err(|e| ExtractError::Tool(format!("transcription task failed: {}", e)))?
    }
}

/// Decodes any audio file to 16 kHz mono samples in [-1, 1] via ffmpeg.
async fn decode_pcm(audio: &Path) -> Result<Vec<f32>, ExtractError> {
    let dir = tempfile::tempdir()?;
    let wav = dir.path().join("audio.wav");

    let output = Command::new("ffmpeg")
        .arg("-nostdin")
        .arg("-y")
        .arg("-i")
        .arg(audio)
        .args(["-ac", "1", "-ar", SAMPLE_RATE, "-acodec", "pcm_s16le"])
        .arg(&wav)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractError::Tool(format!("failed to run ffmpeg: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("no output");
        return Err(ExtractError::Tool(format!("ffmpeg could not decode {}: {}", audio.display(), reason)));
    }

    // the temp dir moves along so the wav outlives the read
    tokio::task::spawn_blocking(move || {
        let samples = read_wav(&wav);
        drop(dir);
        samples
    })
    .await
    .map_err(|e| ExtractError::Tool(format!("wav decoding failed: {}", e)))?
}

fn read_wav(path: &Path) -> Result<Vec<f32>, ExtractError> {
    let mut reader =
        WavReader::open(path).map_err(|e| ExtractError::Tool(format!("failed to read wav: {}", e)))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(ExtractError::Tool("expected 16-bit integer samples".into()));
    }

    reader
        .samples::<i16>()
        .map(|sample| sample.map(|value| value as f32 / 32768.0))
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| ExtractError::Tool(format!("failed to read samples: {}", e)))
}

fn run_model(
    model_path: &Path,
    language: Option<&str>,
    threads: i32,
    samples: &[f32],
) -> Result<Vec<Segment>, ExtractError> {
    let whisper_err = |e: whisper_rs::WhisperError| ExtractError::Tool(format!("whisper: {}", e));

    let ctx = WhisperContext::new_with_params(&model_path.to_string_lossy(), WhisperContextParameters::default())
        .map_err(|e| ExtractError::Tool(format!("failed to open whisper model {}: {}", model_path.display(), e)))?;
    let mut state = ctx.create_state().map_err(whisper_err)?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(language);
    params.set_translate(false);
    params.set_n_threads(threads);
    params.set_temperature(0.3);
    params.set_no_context(false);
    params.set_suppress_blank(true);
    params.set_suppress_non_speech_tokens(true);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);

    debug!("Running whisper model {} on {} samples", model_path.display(), samples.len());
    state.full(params, samples).map_err(whisper_err)?;

    let count = state.full_n_segments().map_err(whisper_err)?;
    let mut segments = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count {
        // whisper timestamps are in 10ms ticks
        segments.push(Segment {
            start: state.full_get_segment_t0(i).map_err(whisper_err)? as f64 / 100.0,
            end: state.full_get_segment_t1(i).map_err(whisper_err)? as f64 / 100.0,
            text: state.full_get_segment_text(i).map_err(whisper_err)?,
        });
    }
    Ok(segments)
}
