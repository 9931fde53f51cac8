//! The Downloader contract.
//!
//! External collaborator responsible for actually fetching a video. The
//! orchestrator only ever talks to this trait; it never inspects or
//! re-derives error classification, it trusts what `fetch` reports.

use tokio_util::sync::CancellationToken;

use crate::model::{Outcome, TaskConfig};

/// Receives fractional progress updates (`0.0..=1.0`) for a single task.
///
/// Implementations must be cheap to call and non-blocking; the
/// Downloader is expected to throttle its own call frequency.
pub type ProgressSink = std::sync::Arc<dyn Fn(f64) + Send + Sync>;

#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` per `config`, reporting fractional progress through
    /// `progress` and honoring `cancel`. Never panics on ordinary failure;
    /// every failure mode is returned as `Outcome::Failure`.
    async fn fetch(
        &self,
        url: &str,
        config: &TaskConfig,
        cancel: CancellationToken,
        progress: ProgressSink,
    ) -> Outcome;
}
