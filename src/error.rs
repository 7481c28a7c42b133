use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::schedule::types::{ErrorKind, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} is {actual}, expected {expected}")]
    Conflict {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("an active task already exists for this url: {0}")]
    Duplicate(TaskId),

    #[error("illegal transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt task row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid video url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(String),

    #[error("video unavailable: {0}")]
    Unavailable(String),

    #[error("size limit exceeded: {0}")]
    SizeLimitExceeded(String),

    #[error("no audio stream: {0}")]
    NoAudioStream(String),

    #[error("yt-dlp failed: {0}")]
    Tool(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Network(_) => ErrorKind::Network,
            ExtractError::Unavailable(_) => ErrorKind::Unavailable,
            ExtractError::SizeLimitExceeded(_) => ErrorKind::SizeLimitExceeded,
            ExtractError::NoAudioStream(_) => ErrorKind::NoAudioStream,
            ExtractError::Tool(_) | ExtractError::Io(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum EvictionError {
    #[error("failed to remove {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
