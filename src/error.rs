//! Crate-level error type.
//!
//! Per-task failures never surface here — they live in `Task::error_history`
//! / `ErrorKind` and are queried through the Control Surface. This type
//! only covers genuine misuse or internal invariant violations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid video_id '{0}': must match ^[A-Za-z0-9_-]{{11}}$")]
    InvalidVideoId(String),

    #[error("batch config could not be serialized: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("batch config could not be parsed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
