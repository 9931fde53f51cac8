//! Bounded worker pool.
//!
//! Each worker is an independent loop: wait for the pause gate, pull one
//! task off the Queue, run it through the Downloader, and hand the
//! outcome to the Lifecycle Controller over the completion channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::downloader::contract::Downloader;
use crate::model::{DownloadState, Outcome, Task};
use crate::progress::ProgressAggregator;
use crate::queue::TaskQueue;

/// Handles shared by every worker. Cheap to clone (all `Arc`s).
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub downloader: Arc<dyn Downloader>,
    pub progress: Arc<ProgressAggregator>,
    pub cancel: CancellationToken,
    pub paused: Arc<AtomicBool>,
    pub pause_notify: Arc<Notify>,
    pub task_notify: Arc<Notify>,
    pub completion_tx: mpsc::UnboundedSender<(Task, Outcome)>,
}

pub fn spawn_worker(ctx: WorkerContext, worker_id: usize) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(worker_id, "worker started");
        loop {
            wait_while_paused(&ctx).await;
            if ctx.cancel.is_cancelled() {
                break;
            }

            let Some(mut task) = ctx.queue.try_dequeue() else {
                tokio::select! {
                    _ = ctx.task_notify.notified() => {},
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {},
                    _ = ctx.cancel.cancelled() => break,
                }
                continue;
            };
            ctx.progress.on_dispatched(&task);

            if ctx.cancel.is_cancelled() {
                task.transition_to(DownloadState::Cancelled);
                ctx.progress.on_fetch_finished(&task.id);
                let _ = ctx.completion_tx.send((
                    task,
                    Outcome::Failure {
                        kind: crate::model::ErrorKind::Cancelled,
                        message: "cancelled before dispatch".to_string(),
                    },
                ));
                continue;
            }

            task.wait_until = None;
            task.transition_to(DownloadState::Downloading);
            tracing::info!(worker_id, task_id = %task.id, "dispatching task");

            let task_id = task.id.clone();
            let progress = ctx.progress.clone();
            let sink: crate::downloader::contract::ProgressSink = Arc::new(move |fraction| {
                progress.on_progress(&task_id, fraction);
            });

            let outcome = ctx
                .downloader
                .fetch(&task.video.url, &task.config, ctx.cancel.clone(), sink)
                .await;

            task.progress = match &outcome {
                Outcome::Success => 1.0,
                Outcome::Failure { .. } => task.progress,
            };

            ctx.progress.on_fetch_finished(&task.id);
            let _ = ctx.completion_tx.send((task, outcome));
        }
        tracing::debug!(worker_id, "worker stopped");
    })
}

async fn wait_while_paused(ctx: &WorkerContext) {
    while ctx.paused.load(Ordering::SeqCst) && !ctx.cancel.is_cancelled() {
        tokio::select! {
            _ = ctx.pause_notify.notified() => {},
            _ = ctx.cancel.cancelled() => {},
        }
    }
}
