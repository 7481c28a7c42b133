use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::transcribe::{self, Transcriber};
use super::{subtitle, ExtractRequest, Extraction, Extractor};
use crate::config::Config;
use crate::error::ExtractError;
use crate::utils::format_file_size;

/// Downloads audio and captions by driving the `yt-dlp` executable.
pub struct YtDlpExtractor {
    yt_dlp_path: String,
    output_dir: PathBuf,
    max_audio_bytes: u64,
    max_duration_secs: u64,
    subtitle_langs: Vec<String>,
    /// Produces a transcript when a video has no usable captions.
    transcriber: Option<Arc<dyn Transcriber>>,
}

/// The subset of `yt-dlp --dump-json` output we look at.
#[derive(Debug, Default, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    is_live: Option<bool>,
    was_live: Option<bool>,
    live_status: Option<String>,
    formats: Option<Vec<FormatInfo>>,
    subtitles: Option<HashMap<String, serde_json::Value>>,
    automatic_captions: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct FormatInfo {
    acodec: Option<String>,
    vcodec: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl FormatInfo {
    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    fn audio_only(&self) -> bool {
        self.has_audio() && self.vcodec.as_deref() == Some("none")
    }

    fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx).map(|size| size.max(0.0) as u64)
    }
}

impl VideoInfo {
    fn has_audio(&self) -> bool {
        match &self.formats {
            Some(formats) if !formats.is_empty() => formats.iter().any(FormatInfo::has_audio),
            // nothing listed, let the download decide
            _ => true,
        }
    }

    /// Size of the smallest audio-only stream with a known size.
    fn audio_size_estimate(&self) -> Option<u64> {
        self.formats
            .iter()
            .flatten()
            .filter(|format| format.audio_only())
            .filter_map(FormatInfo::size)
            .min()
    }

    /// First configured language with a manual track, else the first with an automatic one.
    fn pick_subtitle(&self, langs: &[String]) -> Option<(String, bool)> {
        let find = |tracks: &Option<HashMap<String, serde_json::Value>>| {
            let tracks = tracks.as_ref()?;
            langs.iter().find(|lang| tracks.contains_key(lang.as_str())).cloned()
        };
        find(&self.subtitles)
            .map(|lang| (lang, false))
            .or_else(|| find(&self.automatic_captions).map(|lang| (lang, true)))
    }
}

impl YtDlpExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            yt_dlp_path: config.yt_dlp_path.clone(),
            output_dir: config.download_dir.clone(),
            max_audio_bytes: config.max_audio_bytes,
            max_duration_secs: config.max_duration_secs,
            subtitle_langs: config.subtitle_langs.clone(),
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        match Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!("Using yt-dlp {}", String::from_utf8_lossy(&output.stdout).trim());
                true
            }
            _ => false,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, ExtractError> {
        debug!("Running {} {}", self.yt_dlp_path, args.join(" "));
        Command::new(&self.yt_dlp_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::Tool(format!("failed to run {}: {}", self.yt_dlp_path, e)))
    }

    async fn probe(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let output = self
            .run(&["--dump-json", "--no-playlist", "--skip-download", "--no-warnings", url])
            .await?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        let info: VideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Tool(format!("unreadable video metadata: {}", e)))?;
        debug!(
            "Probed {}: duration {:?}, live_status {:?}, was_live {:?}",
            url, info.duration, info.live_status, info.was_live
        );
        Ok(info)
    }

    fn check_limits(&self, info: &VideoInfo) -> Result<(), ExtractError> {
        match info.live_status.as_deref() {
            Some("is_upcoming") => {
                return Err(ExtractError::Unavailable("scheduled stream has not started yet".into()));
            }
            Some("is_live") => return Err(live_stream()),
            _ if info.is_live == Some(true) => return Err(live_stream()),
            _ => {}
        }
        if !info.has_audio() {
            return Err(ExtractError::NoAudioStream("no format carries an audio codec".into()));
        }
        if let Some(duration) = info.duration {
            if duration > self.max_duration_secs as f64 {
                return Err(ExtractError::SizeLimitExceeded(format!(
                    "duration {}s exceeds the {}s limit",
                    duration as u64, self.max_duration_secs
                )));
            }
        }
        if let Some(size) = info.audio_size_estimate() {
            if size > self.max_audio_bytes {
                return Err(ExtractError::SizeLimitExceeded(format!(
                    "audio stream is {}, limit is {}",
                    format_file_size(size),
                    format_file_size(self.max_audio_bytes)
                )));
            }
        }
        // fragmented downloads ignore --max-filesize, so an unknown length has no ceiling
        if info.duration.is_none() && info.audio_size_estimate().is_none() {
            return Err(ExtractError::SizeLimitExceeded(
                "neither duration nor audio size is known".into(),
            ));
        }
        Ok(())
    }

    async fn download_audio(&self, url: &str, staging: &Path, stem: &str) -> Result<PathBuf, ExtractError> {
        let template = staging.join(format!("{}.%(ext)s", stem));
        let template = template.to_string_lossy();
        let max_filesize = self.max_audio_bytes.to_string();
        let output = self
            .run(&[
                "--no-playlist",
                "--no-progress",
                "--match-filter",
                "!is_live",
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                "mp3",
                "--max-filesize",
                max_filesize.as_str(),
                "-o",
                &*template,
                url,
            ])
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_failure(&stderr));
        }

        let audio = staging.join(format!("{}.mp3", stem));
        match tokio::fs::metadata(&audio).await {
            Ok(meta) if meta.len() > self.max_audio_bytes => Err(ExtractError::SizeLimitExceeded(format!(
                "audio file is {}, limit is {}",
                format_file_size(meta.len()),
                format_file_size(self.max_audio_bytes)
            ))),
            Ok(_) => Ok(audio),
            Err(_) => {
                // yt-dlp exits cleanly when --max-filesize aborts the download
                let stdout = String::from_utf8_lossy(&output.stdout);
                if stdout.contains("does not pass filter") {
                    Err(live_stream())
                } else if stdout.contains("max-filesize") || stderr.contains("max-filesize") {
                    Err(ExtractError::SizeLimitExceeded(format!(
                        "download aborted above {}",
                        format_file_size(self.max_audio_bytes)
                    )))
                } else {
                    Err(ExtractError::NoAudioStream("yt-dlp produced no audio file".into()))
                }
            }
        }
    }

    async fn download_subtitle(
        &self,
        url: &str,
        info: &VideoInfo,
        staging: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, ExtractError> {
        let Some((lang, automatic)) = info.pick_subtitle(&self.subtitle_langs) else {
            debug!("No captions in {:?} for {}", self.subtitle_langs, url);
            return Ok(None);
        };

        let template = staging.join(stem);
        let template = template.to_string_lossy();
        let write_flag = if automatic { "--write-auto-subs" } else { "--write-subs" };
        let output = self
            .run(&[
                "--no-playlist",
                "--skip-download",
                write_flag,
                "--sub-langs",
                lang.as_str(),
                "--sub-format",
                "vtt",
                "-o",
                &*template,
                url,
            ])
            .await?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let vtt = staging.join(format!("{}.{}.vtt", stem, lang));
        let content = tokio::fs::read_to_string(&vtt).await?;
        let text = subtitle::vtt_to_text(&content);
        if text.is_empty() {
            return Ok(None);
        }

        let path = staging.join(format!("{}.txt", stem));
        tokio::fs::write(&path, text).await?;
        Ok(Some(path))
    }

    /// Transcribes the staged audio when captions were missing. Failures only cost the transcript.
    async fn transcribe_fallback(&self, audio: &Path, staging: &Path, stem: &str, task_id: i64) -> Option<PathBuf> {
        let transcriber = self.transcriber.as_ref()?;
        info!("No captions for task {}, transcribing audio", task_id);
        match transcribe::transcribe_to_file(transcriber.as_ref(), audio, staging, stem).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Transcription for task {} failed: {}", task_id, e);
                None
            }
        }
    }

    async fn publish(&self, staged: &Path) -> Result<PathBuf, ExtractError> {
        let name = staged
            .file_name()
            .ok_or_else(|| ExtractError::Tool(format!("bad staged path {}", staged.display())))?;
        let target = self.output_dir.join(name);
        tokio::fs::rename(staged, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, request: &ExtractRequest) -> Result<Extraction, ExtractError> {
        let info = self.probe(&request.url).await?;
        self.check_limits(&info)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        // leftovers of an aborted attempt go away with the staging dir
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.output_dir)?;
        let stem = request.file_stem();

        let audio = self.download_audio(&request.url, staging.path(), &stem).await?;
        let subtitle = match self.download_subtitle(&request.url, &info, staging.path(), &stem).await {
            Ok(subtitle) => subtitle,
            Err(e) => {
                warn!("Captions for task {} skipped: {}", request.task_id, e);
                None
            }
        };
        let subtitle = match subtitle {
            Some(path) => Some(path),
            None => self.transcribe_fallback(&audio, staging.path(), &stem, request.task_id).await,
        };

        let audio_path = self.publish(&audio).await?;
        let subtitle_path = match subtitle {
            Some(path) => Some(self.publish(&path).await?),
            None => None,
        };

        Ok(Extraction {
            title: info.title.unwrap_or_else(|| request.url.clone()),
            description: info.description.filter(|d| !d.trim().is_empty()),
            audio_path,
            subtitle_path,
        })
    }
}

fn live_stream() -> ExtractError {
    ExtractError::SizeLimitExceeded("live streams have no length limit".into())
}

/// Maps yt-dlp's stderr onto an extraction error.
pub fn classify_failure(stderr: &str) -> ExtractError {
    let message = error_line(stderr);
    let lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if has(&["max-filesize", "file is larger than"]) {
        ExtractError::SizeLimitExceeded(message)
    } else if has(&["requested format is not available", "no audio"]) {
        ExtractError::NoAudioStream(message)
    } else if has(&[
        "video unavailable",
        "private video",
        "this video is not available",
        "has been removed",
        "members-only",
        "sign in to confirm your age",
        "not available in your country",
        "is not a valid url",
        "unsupported url",
    ]) {
        ExtractError::Unavailable(message)
    } else if has(&[
        "unable to download",
        "http error",
        "timed out",
        "connection",
        "network is unreachable",
        "temporary failure in name resolution",
        "name or service not known",
    ]) {
        ExtractError::Network(message)
    } else {
        ExtractError::Tool(message)
    }
}

/// The last `ERROR:` line, or the last non-empty line.
fn error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "yt-dlp exited without output".to_string())
}
