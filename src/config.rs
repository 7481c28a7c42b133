use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;

const DEFAULT_DATABASE_PATH: &str = "./data/tasks.db";
const DEFAULT_DOWNLOAD_DIR: &str = "./data/download";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_MODEL_DIR: &str = "./models";
const DEFAULT_SUBTITLE_LANGS: &str = "zh-Hans,zh-CN,zh,en";

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Process-wide configuration, read once from the environment and `.env`.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Aggregate byte budget for all live artifacts.
    pub storage_limit_bytes: u64,
    /// Per-task audio ceiling; also the amount reserved before a download starts.
    pub max_audio_bytes: u64,
    pub max_duration_secs: u64,
    /// `None` disables the extraction timeout.
    pub extraction_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub worker_count: usize,
    /// `None` keeps artifacts until the storage budget forces eviction.
    pub artifact_retention: Option<chrono::Duration>,
    pub page_size: u64,
    pub subtitle_langs: Vec<String>,
    pub yt_dlp_path: String,
    pub submit_rate_per_minute: u32,
    /// Transcribe the audio when a video has no captions. Needs the `whisper` feature.
    pub transcribe_fallback: bool,
    pub whisper_model_dir: PathBuf,
    /// `None` lets the model detect the spoken language.
    pub transcribe_language: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            storage_limit_bytes: 50 * GIB,
            max_audio_bytes: 512 * MIB,
            max_duration_secs: 4 * 60 * 60,
            extraction_timeout: Some(Duration::from_secs(30 * 60)),
            poll_interval: Duration::from_secs(10),
            worker_count: 1,
            artifact_retention: None,
            page_size: 40,
            subtitle_langs: split_list(DEFAULT_SUBTITLE_LANGS),
            yt_dlp_path: "yt-dlp".to_string(),
            submit_rate_per_minute: 60,
            transcribe_fallback: false,
            whisper_model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            transcribe_language: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let extraction_timeout = match parse_or("EXTRACTION_TIMEOUT_SECS", 30 * 60u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let artifact_retention = match parse_or("ARTIFACT_RETENTION_DAYS", 0i64) {
            days if days > 0 => Some(chrono::Duration::days(days)),
            _ => None,
        };

        Self {
            bind_addr: parse_or("BIND_ADDR", defaults.bind_addr),
            database_path: var("DATABASE_PATH").map(PathBuf::from).unwrap_or(defaults.database_path),
            download_dir: var("DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.download_dir),
            log_dir: var("LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            storage_limit_bytes: parse_or("STORAGE_LIMIT_BYTES", defaults.storage_limit_bytes),
            max_audio_bytes: parse_or("MAX_AUDIO_BYTES", defaults.max_audio_bytes),
            max_duration_secs: parse_or("MAX_DURATION_SECS", defaults.max_duration_secs),
            extraction_timeout,
            poll_interval: Duration::from_millis(parse_or("WORKER_POLL_INTERVAL_MS", 10_000u64)),
            worker_count: parse_or("WORKER_COUNT", defaults.worker_count).max(1),
            artifact_retention,
            page_size: parse_or("PAGE_SIZE", defaults.page_size).max(1),
            subtitle_langs: var("SUBTITLE_LANGS")
                .map(|langs| split_list(&langs))
                .unwrap_or(defaults.subtitle_langs),
            yt_dlp_path: var("YT_DLP_PATH").unwrap_or(defaults.yt_dlp_path),
            submit_rate_per_minute: parse_or("SUBMIT_RATE_PER_MINUTE", defaults.submit_rate_per_minute),
            transcribe_fallback: flag("TRANSCRIBE_FALLBACK", defaults.transcribe_fallback),
            whisper_model_dir: var("WHISPER_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.whisper_model_dir),
            transcribe_language: var("TRANSCRIBE_LANGUAGE").filter(|lang| lang != "auto"),
        }
    }

    /// Creates the database parent directory, the download directory and the log directory.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(dir) = self.database_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::create_dir_all(&self.download_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
    .filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            // logging is not installed yet when configuration is read
            eprintln!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        None => default,
    }
}

fn flag(key: &str, default: bool) -> bool {
    match var(key).map(|raw| raw.trim().to_ascii_lowercase()) {
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                eprintln!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
