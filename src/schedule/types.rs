use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = i64;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The only legal edges are `pending -> processing -> {completed, failed}`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        match status {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", status)),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cause recorded next to `error_message` on failed tasks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Unavailable,
    SizeLimitExceeded,
    NoAudioStream,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::SizeLimitExceeded => "size_limit_exceeded",
            ErrorKind::NoAudioStream => "no_audio_stream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "network" => Ok(ErrorKind::Network),
            "unavailable" => Ok(ErrorKind::Unavailable),
            "size_limit_exceeded" => Ok(ErrorKind::SizeLimitExceeded),
            "no_audio_stream" => Ok(ErrorKind::NoAudioStream),
            "timeout" => Ok(ErrorKind::Timeout),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(format!("Invalid error kind: {}", kind)),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    // worker instance that claimed the task
    pub claimed_by: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    // artifact file names, relative to the download directory
    pub audio_path: Option<String>,
    pub subtitle_path: Option<String>,
    pub artifact_bytes: u64,
    pub evicted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl Task {
    /// Audio file name, if the artifact is still on disk.
    pub fn live_audio(&self) -> Option<&str> {
        self.live(self.audio_path.as_deref())
    }

    /// Subtitle file name, if the artifact is still on disk.
    pub fn live_subtitle(&self) -> Option<&str> {
        self.live(self.subtitle_path.as_deref())
    }

    fn live<'a>(&self, path: Option<&'a str>) -> Option<&'a str> {
        if self.status == TaskStatus::Completed && self.evicted_at.is_none() {
            path
        } else {
            None
        }
    }
}

/// Outputs of a successful extraction, as written into the task row.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub title: String,
    pub description: Option<String>,
    pub audio_path: String,
    pub subtitle_path: Option<String>,
    pub bytes: u64,
}

/// A state change applied through `TaskStore::transition`. The target status is implied.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    Claim { worker_id: String },
    Complete(Artifacts),
    Fail { kind: ErrorKind, message: String },
}

impl TaskChange {
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskChange::Claim { .. } => TaskStatus::Processing,
            TaskChange::Complete(_) => TaskStatus::Completed,
            TaskChange::Fail { .. } => TaskStatus::Failed,
        }
    }
}
