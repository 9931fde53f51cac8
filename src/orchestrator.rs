//! Orchestrator: owns the queue, worker pool, lifecycle controller and
//! progress aggregator, and runs them until the batch drains or is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::downloader::contract::Downloader;
use crate::lifecycle::LifecycleController;
use crate::model::{Outcome, Task, TaskConfig, VideoRef};
use crate::pool::{self, WorkerContext};
use crate::progress::{ProgressAggregator, Status};
use crate::queue::TaskQueue;
use crate::retry::RetryPolicy;

pub struct Orchestrator {
    pub(crate) queue: Arc<TaskQueue>,
    downloader: Arc<dyn Downloader>,
    config: BatchConfig,
    pub(crate) progress: Arc<ProgressAggregator>,
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    pause_notify: Arc<Notify>,
    task_notify: Arc<Notify>,
    completion_tx: mpsc::UnboundedSender<(Task, Outcome)>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    lifecycle_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    completion_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<(Task, Outcome)>>>,
    started: AtomicBool,
    done_notify: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(downloader: Arc<dyn Downloader>, config: BatchConfig) -> Arc<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            queue: Arc::new(TaskQueue::new()),
            downloader,
            config,
            progress: Arc::new(ProgressAggregator::new()),
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            pause_notify: Arc::new(Notify::new()),
            task_notify: Arc::new(Notify::new()),
            completion_tx,
            workers: tokio::sync::Mutex::new(Vec::new()),
            lifecycle_handle: tokio::sync::Mutex::new(None),
            completion_rx: tokio::sync::Mutex::new(Some(completion_rx)),
            started: AtomicBool::new(false),
            done_notify: Arc::new(Notify::new()),
        })
    }

    pub fn add(self: &Arc<Self>, refs: Vec<VideoRef>, config: TaskConfig) {
        if self.cancel.is_cancelled() {
            tracing::warn!("ignoring Add() on a cancelled batch");
            return;
        }
        let mut admitted = 0;
        for video in refs {
            if let Err(err) = video.validate() {
                tracing::warn!(%err, video_id = %video.video_id, "rejecting invalid video_id on Add()");
                continue;
            }
            self.queue.enqueue(Task::new(video, config.clone()));
            admitted += 1;
        }
        self.progress.on_admitted(admitted);
        self.task_notify.notify_waiters();
    }

    /// Spawns the worker pool and the Lifecycle Controller. No-op if
    /// already started.
    pub async fn start(self: &Arc<Self>) {
        let status = self.progress.snapshot().status;
        if matches!(status, Status::Cancelled | Status::Completed) {
            tracing::warn!(?status, "ignoring Start() from a terminal status");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("ignoring Start() on an already-running batch");
            return;
        }
        let Some(completion_rx) = self.completion_rx.lock().await.take() else {
            return;
        };
        self.progress.set_status(Status::Running);

        let controller = LifecycleController::new(
            self.queue.clone(),
            self.progress.clone(),
            RetryPolicy::new(self.config.retry),
            self.cancel.clone(),
            self.task_notify.clone(),
            self.config.stop_on_first_error,
        );
        let lifecycle_handle = tokio::spawn(controller.run(completion_rx));
        *self.lifecycle_handle.lock().await = Some(lifecycle_handle);

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.max_concurrent {
            let ctx = WorkerContext {
                queue: self.queue.clone(),
                downloader: self.downloader.clone(),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
                paused: self.paused.clone(),
                pause_notify: self.pause_notify.clone(),
                task_notify: self.task_notify.clone(),
                completion_tx: self.completion_tx.clone(),
            };
            workers.push(pool::spawn_worker(ctx, worker_id));
        }
        drop(workers);

        let watcher = self.clone();
        tokio::spawn(async move { watcher.watch_for_completion().await });
    }

    pub fn pause(&self) {
        if self.progress.snapshot().status != Status::Running {
            tracing::warn!("ignoring Pause() outside Running");
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.progress.set_status(Status::Paused);
    }

    pub fn resume(&self) {
        if self.progress.snapshot().status != Status::Paused {
            tracing::warn!("ignoring Resume() outside Paused");
            return;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.progress.set_status(Status::Running);
        self.pause_notify.notify_waiters();
    }

    /// Idempotent: a second call observes the batch already cancelled and
    /// does nothing further.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let drained = self.queue.drain();
        self.progress.on_queue_drained_to_cancelled(drained.len());
        self.progress.set_status(Status::Cancelled);
        self.pause_notify.notify_waiters();
        self.task_notify.notify_waiters();
        self.done_notify.notify_waiters();
    }

    pub fn progress_snapshot(&self) -> crate::progress::BatchProgress {
        self.progress.snapshot()
    }

    pub fn summary(&self) -> crate::progress::BatchSummary {
        self.progress.summary()
    }

    async fn watch_for_completion(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let (snap, retry_pending, in_transit) = self.progress.snapshot_with_internal_counts();
            let accounted = snap.completed
                + snap.failed
                + snap.cancelled
                + snap.active
                + snap.queue_size
                + retry_pending
                + in_transit;
            if snap.total > 0 && accounted != snap.total {
                tracing::error!(
                    total = snap.total,
                    accounted,
                    "task accounting invariant violated, failing batch"
                );
                self.progress.set_status(Status::Error);
                self.cancel.cancel();
                self.done_notify.notify_waiters();
                return;
            }
            let drained = snap.queue_size == 0
                && retry_pending == 0
                && in_transit == 0
                && snap.active == 0
                && snap.status == Status::Running;
            if drained && snap.total > 0 {
                self.progress.set_status(Status::Completed);
                self.done_notify.notify_waiters();
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Waits, up to `timeout`, for the batch to reach a terminal status,
    /// then joins the worker pool (recommended default: 5 minutes).
    pub async fn join(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.done_notify.notified()).await;
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        if let Some(handle) = self.lifecycle_handle.lock().await.take() {
            handle.abort();
        }
    }
}
