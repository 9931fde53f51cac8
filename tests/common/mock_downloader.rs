//! Configurable `Downloader` test double: behavior is keyed by URL, so each
//! scenario can give every participating URL its own outcome sequence,
//! timing and progress curve.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use ytbatch::{Downloader, ErrorKind, Outcome, ProgressSink, TaskConfig};

#[derive(Clone)]
pub enum MockOutcome {
    Success,
    Fail(ErrorKind),
}

/// How one URL behaves across (possibly repeated) invocations.
#[derive(Clone)]
pub struct UrlBehavior {
    /// One entry per invocation, in order. The last entry repeats once the
    /// sequence is exhausted (a URL that "always fails" is just `vec![Fail(..)]`).
    pub outcomes: Vec<MockOutcome>,
    /// Total time the fetch takes before resolving, absent cancellation.
    pub delay: Duration,
    /// Progress fractions reported partway through, as (offset, fraction) pairs.
    pub progress_events: Vec<(Duration, f64)>,
    /// If set, the fetch polls the cancellation token at this granularity and
    /// bails out with `ErrorKind::Cancelled` as soon as it is observed.
    pub cancel_poll_interval: Option<Duration>,
}

impl UrlBehavior {
    pub fn success_after(delay: Duration) -> Self {
        Self {
            outcomes: vec![MockOutcome::Success],
            delay,
            progress_events: Vec::new(),
            cancel_poll_interval: None,
        }
    }

    pub fn always_fails(kind: ErrorKind) -> Self {
        Self {
            outcomes: vec![MockOutcome::Fail(kind)],
            delay: Duration::from_millis(1),
            progress_events: Vec::new(),
            cancel_poll_interval: None,
        }
    }

    pub fn with_progress(mut self, events: Vec<(Duration, f64)>) -> Self {
        self.progress_events = events;
        self
    }

    pub fn cancellable_within(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = Some(interval);
        self
    }
}

pub struct MockDownloader {
    behaviors: HashMap<String, UrlBehavior>,
    call_counts: Mutex<HashMap<String, usize>>,
}

impl MockDownloader {
    pub fn new(behaviors: HashMap<String, UrlBehavior>) -> Self {
        Self {
            behaviors,
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn call_count(&self, url: &str) -> usize {
        *self.call_counts.lock().unwrap().get(url).unwrap_or(&0)
    }
}

#[async_trait::async_trait]
impl Downloader for MockDownloader {
    async fn fetch(
        &self,
        url: &str,
        _config: &TaskConfig,
        cancel: CancellationToken,
        progress: ProgressSink,
    ) -> Outcome {
        let attempt = {
            let mut counts = self.call_counts.lock().unwrap();
            let entry = counts.entry(url.to_string()).or_insert(0);
            *entry += 1;
            *entry - 1
        };

        let behavior = self
            .behaviors
            .get(url)
            .unwrap_or_else(|| panic!("no mock behavior registered for {url}"));
        let outcome = behavior
            .outcomes
            .get(attempt)
            .or_else(|| behavior.outcomes.last())
            .cloned()
            .expect("behavior must have at least one outcome");

        let poll = behavior
            .cancel_poll_interval
            .unwrap_or(behavior.delay.max(Duration::from_millis(1)));
        let mut elapsed = Duration::ZERO;
        let mut next_progress = 0;
        while elapsed < behavior.delay {
            if cancel.is_cancelled() {
                return Outcome::Failure {
                    kind: ErrorKind::Cancelled,
                    message: "cancelled".to_string(),
                };
            }
            let step = poll.min(behavior.delay - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
            while next_progress < behavior.progress_events.len()
                && behavior.progress_events[next_progress].0 <= elapsed
            {
                progress(behavior.progress_events[next_progress].1);
                next_progress += 1;
            }
        }

        match outcome {
            MockOutcome::Success => Outcome::Success,
            MockOutcome::Fail(kind) => Outcome::Failure {
                kind,
                message: format!("mock failure: {kind:?}"),
            },
        }
    }
}
