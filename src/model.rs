//! Task data model
//!
//! The units the orchestrator schedules, runs and reports on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{TaskState, TaskStateFactory};

/// Identifies a single video to fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoRef {
    pub video_id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl VideoRef {
    pub fn new(video_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            url: url.into(),
            title: None,
        }
    }

    /// `video_id` must be an 11-character run of `[A-Za-z0-9_-]`.
    pub fn validate(&self) -> crate::error::OrchestratorResult<()> {
        let valid = self.video_id.len() == 11
            && self
                .video_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(())
        } else {
            Err(crate::error::OrchestratorError::InvalidVideoId(
                self.video_id.clone(),
            ))
        }
    }
}

/// Desired output container for a fetched video.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

/// Requested quality tier. `Best`/`Worst` defer the concrete choice to the Downloader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Best,
    Worst,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

/// Per-task fetch parameters, frozen after task creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub output_directory: String,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub format: Format,
    /// Template for the on-disk filename; the Downloader interprets it.
    #[serde(default)]
    pub naming_pattern: Option<String>,
    /// Per-fetch wall-clock budget. Enforced by the Downloader, not the
    /// orchestrator — the orchestrator only enforces the join timeout.
    #[serde(default, with = "crate::config::duration_secs_opt")]
    pub timeout: Option<Duration>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            output_directory: ".".to_string(),
            quality: Quality::default(),
            format: Format::default(),
            naming_pattern: None,
            timeout: None,
        }
    }
}

/// A unique, human-traceable task identifier: `<video_id>:<seq>`.
pub type TaskId = String;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id(video_id: &str) -> TaskId {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{video_id}:{seq}")
}

/// Closed classification of everything that can go wrong fetching a video.
///
/// The Downloader classifies its own failures; the orchestrator never
/// re-derives a kind from an error message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Filesystem,
    YouTube,
    Authentication,
    InvalidInput,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Network, Filesystem and Unknown are transient by nature; the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Filesystem | Self::Unknown)
    }
}

/// Result of a single fetch attempt, as reported by the Downloader.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    Failure { kind: ErrorKind, message: String },
}

/// One recorded failed attempt, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Terminal/non-terminal state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Waiting,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl Default for DownloadState {
    fn default() -> Self {
        Self::Waiting
    }
}

/// A single unit of work tracked from admission to a terminal state.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub video: VideoRef,
    pub config: TaskConfig,
    pub state: DownloadState,
    pub progress: f64,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub wait_until: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_history: Vec<RetryAttempt>,

    state_obj: std::sync::Arc<dyn TaskState>,
}

impl Task {
    pub fn new(video: VideoRef, config: TaskConfig) -> Self {
        let id = next_task_id(&video.video_id);
        Self {
            id,
            video,
            config,
            state: DownloadState::Waiting,
            progress: 0.0,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            wait_until: None,
            error_message: None,
            error_history: Vec::new(),
            state_obj: TaskStateFactory::get_state(DownloadState::Waiting),
        }
    }

    /// Move to `new_state`, or silently stay put if the transition is illegal.
    ///
    /// Returns whether the transition was applied.
    pub fn transition_to(&mut self, new_state: DownloadState) -> bool {
        if !self.state_obj.can_transition_to(new_state) {
            tracing::warn!(
                task_id = %self.id,
                from = ?self.state,
                to = ?new_state,
                "ignoring illegal task state transition"
            );
            return false;
        }
        self.state = new_state;
        self.state_obj = TaskStateFactory::get_state(new_state);
        match new_state {
            DownloadState::Downloading if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        true
    }

    pub fn record_attempt(&mut self, kind: ErrorKind, message: String) {
        self.error_history.push(RetryAttempt {
            attempt: self.retry_count,
            kind,
            message: message.clone(),
            timestamp: Utc::now(),
        });
        self.error_message = Some(message);
    }

    /// Wall-clock time spent between start and completion, if both are known.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }

    pub fn available_actions(&self) -> Vec<&'static str> {
        self.state_obj.available_actions()
    }
}
