//! Concurrent batch download orchestrator.
//!
//! Drives many video downloads in parallel under a configurable
//! concurrency cap, tracks aggregate progress, retries transient
//! failures with backoff, and supports cooperative pause/resume/cancel
//! across a whole batch. The single-video fetch itself is an external
//! collaborator, reached only through the [`downloader::Downloader`]
//! trait.

pub mod config;
pub mod control;
pub mod downloader;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod retry;

pub use config::{BatchConfig, RetryBackoff, RetryStrategy};
pub use control::{BatchHandle, SubscriptionHandle};
pub use downloader::{Downloader, HttpDownloader, ProgressSink};
pub use error::{OrchestratorError, OrchestratorResult};
pub use model::{
    DownloadState, ErrorKind, Format, Outcome, Quality, RetryAttempt, Task, TaskConfig, TaskId,
    VideoRef,
};
pub use progress::{BatchProgress, BatchSummary, Status};
