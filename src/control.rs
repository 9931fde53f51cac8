//! Control surface: the only thing external callers touch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::BatchConfig;
use crate::downloader::contract::Downloader;
use crate::model::{TaskConfig, VideoRef};
use crate::orchestrator::Orchestrator;
use crate::progress::{BatchProgress, BatchSummary, Status};

pub type SubscriptionHandle = u64;

struct Subscriber {
    callback: Arc<dyn Fn(BatchProgress) + Send + Sync>,
    last_sent: Instant,
    last_status: Option<Status>,
}

struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionHandle, Subscriber>>,
}

impl SubscriberRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn subscribe(&self, callback: Arc<dyn Fn(BatchProgress) + Send + Sync>) -> SubscriptionHandle {
        let handle = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(
            handle,
            Subscriber {
                callback,
                last_sent: Instant::now() - Duration::from_secs(3600),
                last_status: None,
            },
        );
        handle
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers.lock().unwrap().remove(&handle);
    }

    /// Dispatches `snapshot` to every subscriber due for an update: either
    /// the status changed, or `interval` has elapsed since their last call.
    /// A panicking callback is caught and logged, never allowed to break
    /// dispatch for the remaining subscribers.
    fn dispatch(&self, snapshot: &BatchProgress, interval: Duration) {
        let mut subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.values_mut() {
            let status_changed = sub.last_status != Some(snapshot.status);
            if !status_changed && sub.last_sent.elapsed() < interval {
                continue;
            }
            let callback = sub.callback.clone();
            let snapshot = snapshot.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(snapshot);
            }));
            if result.is_err() {
                tracing::error!("progress subscriber callback panicked; ignoring");
            }
            sub.last_sent = Instant::now();
            sub.last_status = Some(snapshot.status);
        }
    }
}

/// Cloneable handle to a running (or not-yet-started) batch. This is the
/// entire public surface an embedding CLI/HTTP/GUI front end needs.
#[derive(Clone)]
pub struct BatchHandle {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<SubscriberRegistry>,
    notify_interval: Duration,
}

impl BatchHandle {
    pub fn new(downloader: Arc<dyn Downloader>, config: BatchConfig) -> Self {
        let notify_interval = config.progress_notify_interval;
        Self {
            orchestrator: Orchestrator::new(downloader, config),
            registry: Arc::new(SubscriberRegistry::new()),
            notify_interval,
        }
    }

    pub fn add(&self, refs: Vec<VideoRef>, config: TaskConfig) {
        self.orchestrator.add(refs, config);
    }

    pub async fn start(&self) {
        self.orchestrator.start().await;
        let mut rx = self.orchestrator.progress.subscribe();
        let registry = self.registry.clone();
        let interval = self.notify_interval;
        tokio::spawn(async move {
            loop {
                registry.dispatch(&rx.borrow().clone(), interval);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    pub fn pause(&self) {
        self.orchestrator.pause();
    }

    pub fn resume(&self) {
        self.orchestrator.resume();
    }

    pub fn cancel(&self) {
        self.orchestrator.cancel();
    }

    pub fn progress(&self) -> BatchProgress {
        self.orchestrator.progress_snapshot()
    }

    pub fn summary(&self) -> BatchSummary {
        self.orchestrator.summary()
    }

    pub fn subscribe(&self, callback: impl Fn(BatchProgress) + Send + Sync + 'static) -> SubscriptionHandle {
        self.registry.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.registry.unsubscribe(handle);
    }

    /// Waits for the batch to drain or cancel, then tears down workers.
    pub async fn join(&self, timeout: Duration) {
        self.orchestrator.join(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unsubscribe_removes_entry_from_registry() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handle = registry.subscribe(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        registry.unsubscribe(handle);

        let snapshot = BatchProgress {
            status: Status::Running,
            total: 1,
            completed: 0,
            failed: 0,
            cancelled: 0,
            active: 1,
            queue_size: 0,
            overall_progress: 0.0,
            current_title: None,
            eta_seconds: None,
        };
        registry.dispatch(&snapshot, Duration::from_millis(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_transition_bypasses_debounce_interval() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.subscribe(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut snapshot = BatchProgress {
            status: Status::Running,
            total: 1,
            completed: 0,
            failed: 0,
            cancelled: 0,
            active: 1,
            queue_size: 0,
            overall_progress: 0.0,
            current_title: None,
            eta_seconds: None,
        };
        registry.dispatch(&snapshot, Duration::from_secs(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // same status, well within the debounce window: suppressed
        registry.dispatch(&snapshot, Duration::from_secs(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // status changed: always dispatched regardless of interval
        snapshot.status = Status::Completed;
        registry.dispatch(&snapshot, Duration::from_secs(3600));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
