//! Progress aggregation and the pub/sub surface for it.
//!
//! Single-writer discipline: only the orchestrator's lifecycle/worker code
//! calls the `on_*` methods below; everyone else only reads snapshots.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::{DownloadState, Task, TaskId};

/// Batch-wide status, mirrored in `BatchProgress`/`BatchSummary`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Error,
}

/// A point-in-time snapshot of the whole batch, as handed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active: usize,
    pub queue_size: usize,
    pub overall_progress: f64,
    pub current_title: Option<String>,
    pub eta_seconds: Option<f64>,
}

/// Final accounting, produced once the batch reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub status: Status,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub success_rate: f64,
    pub elapsed_seconds: f64,
    pub avg_task_seconds: f64,
}

struct Inner {
    total: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
    queue_size: usize,
    retry_pending: usize,
    active_progress: HashMap<TaskId, f64>,
    active_order: Vec<TaskId>,
    active_titles: HashMap<TaskId, String>,
    /// Tasks whose fetch has finished (and so have already left
    /// `active_progress`/the worker's concurrency slot) but whose outcome
    /// the Lifecycle Controller hasn't bucketed yet — in transit on the
    /// completion channel. Keeps `overall_progress` from dipping and the
    /// accounting identity from tearing across that handoff.
    in_transit: HashMap<TaskId, f64>,
    status: Status,
    completed_durations: Vec<Duration>,
}

impl Inner {
    fn overall_progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let terminal = (self.completed + self.failed + self.cancelled) as f64;
        let in_flight: f64 =
            self.active_progress.values().sum::<f64>() + self.in_transit.values().sum::<f64>();
        ((terminal + in_flight) / self.total as f64).min(1.0)
    }

    fn current_title(&self) -> Option<String> {
        self.active_order
            .first()
            .and_then(|id| self.active_titles.get(id).cloned())
    }
}

/// Folds per-task progress and lifecycle transitions into a batch snapshot.
///
/// Owned by a single writer (the Orchestrator's worker/lifecycle code) —
/// nothing else mutates it, which is what lets reads stay lock-light.
pub struct ProgressAggregator {
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<BatchProgress>,
    batch_started_at: Instant,
    batch_started_wall: DateTime<Utc>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        let initial = BatchProgress {
            status: Status::Idle,
            total: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            active: 0,
            queue_size: 0,
            overall_progress: 0.0,
            current_title: None,
            eta_seconds: None,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            inner: Mutex::new(Inner {
                total: 0,
                completed: 0,
                failed: 0,
                cancelled: 0,
                queue_size: 0,
                retry_pending: 0,
                active_progress: HashMap::new(),
                active_order: Vec::new(),
                active_titles: HashMap::new(),
                in_transit: HashMap::new(),
                status: Status::Idle,
                completed_durations: Vec::new(),
            }),
            snapshot_tx,
            batch_started_at: Instant::now(),
            batch_started_wall: Utc::now(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> BatchProgress {
        self.snapshot_tx.borrow().clone()
    }

    /// Snapshot plus the two internal-only buckets (`retry_pending`,
    /// `in_transit`), read under one lock acquisition so the orchestrator's
    /// accounting check and drain condition never compare values torn
    /// across separate updates.
    pub(crate) fn snapshot_with_internal_counts(&self) -> (BatchProgress, usize, usize) {
        let inner = self.inner.lock().unwrap();
        let overall = inner.overall_progress();
        let snapshot = BatchProgress {
            status: inner.status,
            total: inner.total,
            completed: inner.completed,
            failed: inner.failed,
            cancelled: inner.cancelled,
            active: inner.active_progress.len(),
            queue_size: inner.queue_size,
            overall_progress: overall,
            current_title: inner.current_title(),
            eta_seconds: self.eta_seconds(overall),
        };
        (snapshot, inner.retry_pending, inner.in_transit.len())
    }

    pub fn set_status(&self, status: Status) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = status;
        self.publish(&inner);
    }

    /// A batch of `n` fresh tasks was admitted into the Queue.
    pub fn on_admitted(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += n;
        inner.queue_size += n;
        if inner.status == Status::Idle {
            inner.status = Status::Running;
        }
        self.publish(&inner);
    }

    /// A worker pulled a task out of the Queue and claims it as Active in
    /// the same breath, whether or not it actually reaches the Downloader
    /// (a task cancelled between dequeue and dispatch still leaves Active
    /// through `on_fetch_finished`, same as any other outcome). Leaving the
    /// Queue and entering the Active set happen under one lock acquisition
    /// so a task is never, even momentarily, counted in neither bucket.
    pub fn on_dispatched(&self, task: &Task) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue_size = inner.queue_size.saturating_sub(1);
        inner.active_progress.insert(task.id.clone(), 0.0);
        inner.active_order.push(task.id.clone());
        if let Some(title) = &task.video.title {
            inner.active_titles.insert(task.id.clone(), title.clone());
        }
        self.publish(&inner);
    }

    pub fn on_progress(&self, task_id: &TaskId, fraction: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .active_progress
            .insert(task_id.clone(), fraction.clamp(0.0, 1.0));
        self.publish(&inner);
    }

    fn remove_active(inner: &mut Inner, task_id: &TaskId) -> f64 {
        inner.active_order.retain(|id| id != task_id);
        inner.active_titles.remove(task_id);
        inner.active_progress.remove(task_id).unwrap_or(1.0)
    }

    /// The Lifecycle Controller finished routing `task_id`'s outcome to a
    /// retry; it leaves `in_transit` and sits in the retry-pending set until
    /// its backoff timer fires.
    pub fn on_retry_scheduled(&self, task_id: &TaskId) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_transit.remove(task_id);
        inner.retry_pending += 1;
        self.publish(&inner);
    }

    /// A worker is done driving a task through the Downloader, one way or
    /// another, and is about to emit its completion event. Removing the
    /// task from Active here, before that event is sent, keeps a worker
    /// from ever holding two Active slots at once: otherwise the worker
    /// could dispatch its next task before the Lifecycle Controller gets
    /// around to processing the prior completion. The task moves into
    /// `in_transit` rather than disappearing outright, so it stays
    /// accounted for (and still contributes its last-known fraction to
    /// `overall_progress`) until the Controller buckets its outcome.
    pub fn on_fetch_finished(&self, task_id: &TaskId) {
        let mut inner = self.inner.lock().unwrap();
        let fraction = Self::remove_active(&mut inner, task_id);
        inner.in_transit.insert(task_id.clone(), fraction);
        self.publish(&inner);
    }

    /// The backoff timer fired and the task went back onto the Queue.
    pub fn on_retry_requeued(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.retry_pending = inner.retry_pending.saturating_sub(1);
        inner.queue_size += 1;
        self.publish(&inner);
    }

    /// A pending retry was caught by a batch cancellation before it could
    /// be re-enqueued; it resolves straight into the Cancelled bucket.
    pub fn on_retry_cancelled(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.retry_pending = inner.retry_pending.saturating_sub(1);
        inner.cancelled += 1;
        self.publish(&inner);
    }

    /// A task reached a terminal state (Completed, Failed or Cancelled).
    /// Leaves `in_transit` (the worker already left Active, via
    /// `on_fetch_finished`, before emitting the completion event this is
    /// called in response to) and buckets the counters.
    pub fn on_terminal(&self, task: &Task) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_transit.remove(&task.id);
        match task.state {
            DownloadState::Completed => {
                inner.completed += 1;
                if let Some(d) = task.duration() {
                    inner.completed_durations.push(d);
                }
            }
            DownloadState::Failed => inner.failed += 1,
            DownloadState::Cancelled => inner.cancelled += 1,
            _ => {}
        }
        self.publish(&inner);
    }

    /// The Queue was drained straight to the Cancelled bucket (batch cancel).
    pub fn on_queue_drained_to_cancelled(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue_size = inner.queue_size.saturating_sub(n);
        inner.cancelled += n;
        self.publish(&inner);
    }

    fn eta_seconds(&self, overall: f64) -> Option<f64> {
        if overall <= 0.0 {
            return None;
        }
        let elapsed = self.batch_started_at.elapsed().as_secs_f64();
        Some(elapsed * (1.0 - overall) / overall)
    }

    fn publish(&self, inner: &Inner) {
        let overall = inner.overall_progress();
        let _ = self.snapshot_tx.send(BatchProgress {
            status: inner.status,
            total: inner.total,
            completed: inner.completed,
            failed: inner.failed,
            cancelled: inner.cancelled,
            active: inner.active_progress.len(),
            queue_size: inner.queue_size,
            overall_progress: overall,
            current_title: inner.current_title(),
            eta_seconds: self.eta_seconds(overall),
        });
    }

    pub fn summary(&self) -> BatchSummary {
        let inner = self.inner.lock().unwrap();
        let success_rate = inner.completed as f64 / (inner.total.max(1)) as f64 * 100.0;
        let avg_task_seconds = if inner.completed_durations.is_empty() {
            0.0
        } else {
            let sum: f64 = inner
                .completed_durations
                .iter()
                .map(Duration::as_secs_f64)
                .sum();
            sum / inner.completed_durations.len() as f64
        };
        BatchSummary {
            status: inner.status,
            total: inner.total,
            completed: inner.completed,
            failed: inner.failed,
            cancelled: inner.cancelled,
            success_rate,
            elapsed_seconds: (Utc::now() - self.batch_started_wall)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64()
                .max(self.batch_started_at.elapsed().as_secs_f64()),
            avg_task_seconds,
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}
