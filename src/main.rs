#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use yt_extract::{
    config::{Config, CONFIG},
    extract::YtDlpExtractor,
    schedule::{ManagerSettings, TaskManager, TaskScheduler},
    storage::{artifacts::StorageManager, task::SqliteTaskStore},
    utils::{format_file_size, logger},
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = &*CONFIG;
    let _guard = logger::init(&config.log_dir)?;
    config.ensure_dirs()?;

    info!("Starting yt-extract {}", env!("GIT_HASH"));

    info!("Opening task database at {}", config.database_path.display());
    let store = Arc::new(SqliteTaskStore::new(&config.database_path).await?);

    let storage = Arc::new(StorageManager::new(
        store.clone(),
        config.download_dir.clone(),
        config.storage_limit_bytes,
    ));
    info!(
        "Artifacts in {} using {} of {}",
        storage.root().display(),
        format_file_size(storage.usage().await?),
        format_file_size(storage.budget())
    );

    let mut extractor = YtDlpExtractor::new(config);
    if !extractor.check_availability().await {
        warn!("{} is not runnable, extractions will fail until it is installed", config.yt_dlp_path);
    }
    if config.transcribe_fallback {
        extractor = with_transcription(extractor, config);
    }
    let extractor = Arc::new(extractor);

    let task_manager = Arc::new(TaskManager::new(
        store,
        storage,
        extractor,
        ManagerSettings::from(config),
    ));

    let recovered = task_manager.recover_interrupted(chrono::Utc::now()).await?;
    if recovered > 0 {
        warn!("Failed {} task(s) interrupted by the previous shutdown", recovered);
    }

    let scheduler = TaskScheduler::new(task_manager.clone()).with_poll_interval(config.poll_interval);
    scheduler.start(config.worker_count).await;

    let ctx = Arc::new(AppContext::new(task_manager, config));
    let served = yt_extract::web::start_server(ctx, config.bind_addr).await;

    info!("Shutting down...");
    scheduler.stop().await?;

    match served {
        Ok(()) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            Err(e)
        }
    }
}

#[cfg(feature = "whisper")]
fn with_transcription(extractor: YtDlpExtractor, config: &Config) -> YtDlpExtractor {
    let ladder = yt_extract::extract::whisper::model_ladder(
        &config.whisper_model_dir,
        config.transcribe_language.clone(),
    );
    if ladder.is_empty() {
        warn!(
            "No whisper models in {}, transcription fallback disabled",
            config.whisper_model_dir.display()
        );
        return extractor;
    }
    info!("Transcription fallback using models {:?}", ladder.stage_names());
    extractor.with_transcriber(Arc::new(ladder))
}

#[cfg(not(feature = "whisper"))]
fn with_transcription(extractor: YtDlpExtractor, _config: &Config) -> YtDlpExtractor {
    warn!("TRANSCRIBE_FALLBACK is set but this build lacks the `whisper` feature");
    extractor
}
