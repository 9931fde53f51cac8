//! Task lifecycle state machine.
//!
//! State pattern: each state knows its own legal transitions. Singleton
//! state objects avoid allocating one per task.

use std::fmt::Debug;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::model::DownloadState;

pub trait TaskState: Send + Sync + Debug {
    fn state_enum(&self) -> DownloadState;
    fn can_transition_to(&self, target: DownloadState) -> bool;
    fn available_actions(&self) -> Vec<&'static str>;
}

#[derive(Debug)]
struct WaitingState;

impl TaskState for WaitingState {
    fn state_enum(&self) -> DownloadState {
        DownloadState::Waiting
    }

    fn can_transition_to(&self, target: DownloadState) -> bool {
        matches!(
            target,
            DownloadState::Downloading | DownloadState::Cancelled
        )
    }

    fn available_actions(&self) -> Vec<&'static str> {
        vec!["cancel"]
    }
}

#[derive(Debug)]
struct DownloadingState;

impl TaskState for DownloadingState {
    fn state_enum(&self) -> DownloadState {
        DownloadState::Downloading
    }

    fn can_transition_to(&self, target: DownloadState) -> bool {
        matches!(
            target,
            DownloadState::Completed
                | DownloadState::Failed
                | DownloadState::Cancelled
                | DownloadState::Waiting
        )
    }

    fn available_actions(&self) -> Vec<&'static str> {
        vec!["cancel"]
    }
}

#[derive(Debug)]
struct CompletedState;

impl TaskState for CompletedState {
    fn state_enum(&self) -> DownloadState {
        DownloadState::Completed
    }

    fn can_transition_to(&self, _target: DownloadState) -> bool {
        false
    }

    fn available_actions(&self) -> Vec<&'static str> {
        vec![]
    }
}

#[derive(Debug)]
struct FailedState;

impl TaskState for FailedState {
    fn state_enum(&self) -> DownloadState {
        DownloadState::Failed
    }

    fn can_transition_to(&self, _target: DownloadState) -> bool {
        false
    }

    fn available_actions(&self) -> Vec<&'static str> {
        vec![]
    }
}

#[derive(Debug)]
struct CancelledState;

impl TaskState for CancelledState {
    fn state_enum(&self) -> DownloadState {
        DownloadState::Cancelled
    }

    fn can_transition_to(&self, _target: DownloadState) -> bool {
        false
    }

    fn available_actions(&self) -> Vec<&'static str> {
        vec![]
    }
}

pub struct TaskStateFactory;

static WAITING: Lazy<Arc<dyn TaskState>> = Lazy::new(|| Arc::new(WaitingState));
static DOWNLOADING: Lazy<Arc<dyn TaskState>> = Lazy::new(|| Arc::new(DownloadingState));
static COMPLETED: Lazy<Arc<dyn TaskState>> = Lazy::new(|| Arc::new(CompletedState));
static FAILED: Lazy<Arc<dyn TaskState>> = Lazy::new(|| Arc::new(FailedState));
static CANCELLED: Lazy<Arc<dyn TaskState>> = Lazy::new(|| Arc::new(CancelledState));

impl TaskStateFactory {
    pub fn get_state(state: DownloadState) -> Arc<dyn TaskState> {
        match state {
            DownloadState::Waiting => WAITING.clone(),
            DownloadState::Downloading => DOWNLOADING.clone(),
            DownloadState::Completed => COMPLETED.clone(),
            DownloadState::Failed => FAILED.clone(),
            DownloadState::Cancelled => CANCELLED.clone(),
        }
    }
}

/// Consumes completion events one at a time and is the sole writer of the
/// batch counters, keeping their updates strictly serialized.
pub struct LifecycleController {
    queue: Arc<crate::queue::TaskQueue>,
    progress: Arc<crate::progress::ProgressAggregator>,
    retry_policy: crate::retry::RetryPolicy,
    cancel: tokio_util::sync::CancellationToken,
    task_notify: Arc<tokio::sync::Notify>,
    stop_on_first_error: bool,
}

impl LifecycleController {
    pub fn new(
        queue: Arc<crate::queue::TaskQueue>,
        progress: Arc<crate::progress::ProgressAggregator>,
        retry_policy: crate::retry::RetryPolicy,
        cancel: tokio_util::sync::CancellationToken,
        task_notify: Arc<tokio::sync::Notify>,
        stop_on_first_error: bool,
    ) -> Self {
        Self {
            queue,
            progress,
            retry_policy,
            cancel,
            task_notify,
            stop_on_first_error,
        }
    }

    /// Drains `completion_rx` until the channel closes (orchestrator
    /// shutdown) or the batch completes (caller decides when to stop
    /// pumping by dropping the sender / watching `Orchestrator::is_done`).
    pub async fn run(
        self,
        mut completion_rx: tokio::sync::mpsc::UnboundedReceiver<(crate::model::Task, crate::model::Outcome)>,
    ) {
        while let Some((task, outcome)) = completion_rx.recv().await {
            self.handle_completion(task, outcome);
        }
    }

    fn handle_completion(&self, mut task: crate::model::Task, outcome: crate::model::Outcome) {
        use crate::model::{DownloadState, ErrorKind, Outcome};

        match outcome {
            Outcome::Success => {
                task.transition_to(DownloadState::Completed);
                self.progress.on_terminal(&task);
            }
            Outcome::Failure { kind, message } if kind == ErrorKind::Cancelled => {
                task.record_attempt(kind, message);
                // A task cancelled before dispatch is already in this state
                // (set by the worker itself); only transition here if it
                // arrives some other way, e.g. cancelled mid-fetch.
                if task.state != DownloadState::Cancelled {
                    task.transition_to(DownloadState::Cancelled);
                }
                self.progress.on_terminal(&task);
            }
            Outcome::Failure { kind, message } => {
                task.record_attempt(kind, message.clone());
                match self.retry_policy.decide(kind, task.retry_count) {
                    crate::retry::RetryDecision::Retry { delay } => {
                        task.retry_count += 1;
                        task.progress = 0.0;
                        task.wait_until = Some(chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                        task.transition_to(DownloadState::Waiting);
                        self.progress.on_retry_scheduled(&task.id);
                        self.schedule_requeue(task, delay);
                    }
                    crate::retry::RetryDecision::GiveUp => {
                        task.transition_to(DownloadState::Failed);
                        self.progress.on_terminal(&task);
                        if self.stop_on_first_error {
                            self.cancel.cancel();
                        }
                    }
                }
            }
        }
    }

    fn schedule_requeue(&self, task: crate::model::Task, delay: std::time::Duration) {
        let queue = self.queue.clone();
        let progress = self.progress.clone();
        let cancel = self.cancel.clone();
        let notify = self.task_notify.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if cancel.is_cancelled() {
                        progress.on_retry_cancelled();
                        return;
                    }
                    progress.on_retry_requeued();
                    queue.enqueue(task);
                    notify.notify_waiters();
                }
                _ = cancel.cancelled() => {
                    progress.on_retry_cancelled();
                }
            }
        });
    }
}
