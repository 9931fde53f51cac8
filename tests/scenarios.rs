//! End-to-end batch scenarios, against a `MockDownloader` test double.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::mock_downloader::{MockDownloader, UrlBehavior};
use ytbatch::{BatchConfig, ErrorKind, RetryBackoff, RetryStrategy, Status, TaskConfig, VideoRef};

fn vid(n: u32) -> String {
    format!("vid{n:08}")
}

fn url_for(n: u32) -> String {
    format!("https://example.test/{}", vid(n))
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_two_concurrent_workers() {
    let mut behaviors = HashMap::new();
    for n in 0..4 {
        behaviors.insert(
            url_for(n),
            UrlBehavior::success_after(Duration::from_millis(100))
                .with_progress(vec![(Duration::from_millis(50), 0.5)]),
        );
    }
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));
    let config = BatchConfig {
        max_concurrent: 2,
        retry: RetryStrategy {
            enabled: true,
            max_retries: 0,
            ..RetryStrategy::default()
        },
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader, config);
    let refs: Vec<_> = (0..4).map(|n| VideoRef::new(vid(n), url_for(n))).collect();
    batch.add(refs, TaskConfig::default());
    batch.start().await;

    let saw_two_active_two_queued = wait_until(
        || {
            let p = batch.progress();
            p.active == 2 && p.queue_size == 2
        },
        Duration::from_millis(400),
    )
    .await;
    assert!(saw_two_active_two_queued);

    batch.join(Duration::from_secs(5)).await;
    let snap = batch.progress();
    assert_eq!(snap.status, Status::Completed);
    assert_eq!(snap.total, 4);
    assert_eq!(snap.completed, 4);
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.cancelled, 0);
    assert_eq!(snap.active, 0);
    assert_eq!(snap.queue_size, 0);
    assert!((snap.overall_progress - 1.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_exhaustion_attempts_max_retries_plus_one() {
    let url = url_for(0);
    let mut behaviors = HashMap::new();
    behaviors.insert(url.clone(), UrlBehavior::always_fails(ErrorKind::Network));
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));

    let config = BatchConfig {
        max_concurrent: 1,
        retry: RetryStrategy {
            enabled: true,
            max_retries: 2,
            strategy: RetryBackoff::Immediate,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader.clone(), config);
    batch.add(vec![VideoRef::new(vid(0), url.clone())], TaskConfig::default());
    batch.start().await;
    batch.join(Duration::from_secs(5)).await;

    assert_eq!(downloader.call_count(&url), 3);
    let snap = batch.progress();
    assert_eq!(snap.completed, 0);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.cancelled, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_error_gives_up_after_one_attempt() {
    let url = url_for(0);
    let mut behaviors = HashMap::new();
    behaviors.insert(url.clone(), UrlBehavior::always_fails(ErrorKind::YouTube));
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));

    let config = BatchConfig {
        retry: RetryStrategy {
            max_retries: 5,
            ..RetryStrategy::default()
        },
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader.clone(), config);
    batch.add(vec![VideoRef::new(vid(0), url.clone())], TaskConfig::default());
    batch.start().await;
    batch.join(Duration::from_secs(5)).await;

    assert_eq!(downloader.call_count(&url), 1);
    let snap = batch.progress();
    assert_eq!(snap.completed, 0);
    assert_eq!(snap.failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_then_resume_lets_in_flight_task_finish_first() {
    let mut behaviors = HashMap::new();
    for n in 0..3 {
        behaviors.insert(url_for(n), UrlBehavior::success_after(Duration::from_millis(200)));
    }
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));
    let config = BatchConfig {
        max_concurrent: 1,
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader, config);
    let refs: Vec<_> = (0..3).map(|n| VideoRef::new(vid(n), url_for(n))).collect();
    batch.add(refs, TaskConfig::default());
    batch.start().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    batch.pause();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let paused_snap = batch.progress();
    assert_eq!(paused_snap.status, Status::Paused);
    assert_eq!(paused_snap.completed, 1);
    assert_eq!(paused_snap.queue_size, 2);
    assert_eq!(paused_snap.active, 0);

    batch.resume();
    batch.join(Duration::from_secs(5)).await;
    assert_eq!(batch.progress().completed, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_drains_queue_and_stops_in_flight_work() {
    let mut behaviors = HashMap::new();
    for n in 0..5 {
        behaviors.insert(
            url_for(n),
            UrlBehavior::success_after(Duration::from_secs(1))
                .cancellable_within(Duration::from_millis(20)),
        );
    }
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));
    let config = BatchConfig {
        max_concurrent: 2,
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader, config);
    let refs: Vec<_> = (0..5).map(|n| VideoRef::new(vid(n), url_for(n))).collect();
    batch.add(refs, TaskConfig::default());
    batch.start().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    batch.cancel();

    let settled = wait_until(
        || {
            let p = batch.progress();
            p.status == Status::Cancelled && p.active == 0
        },
        Duration::from_millis(500),
    )
    .await;
    assert!(settled);

    let snap = batch.progress();
    assert!(snap.cancelled >= 3);
    assert_eq!(snap.completed + snap.failed + snap.cancelled, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_on_first_error_cancels_the_rest_of_the_batch() {
    let mut behaviors = HashMap::new();
    behaviors.insert(url_for(0), UrlBehavior::success_after(Duration::from_millis(50)));
    behaviors.insert(url_for(1), UrlBehavior::always_fails(ErrorKind::Authentication));
    behaviors.insert(url_for(2), UrlBehavior::success_after(Duration::from_millis(50)));
    behaviors.insert(url_for(3), UrlBehavior::success_after(Duration::from_millis(50)));
    let downloader = std::sync::Arc::new(MockDownloader::new(behaviors));

    let config = BatchConfig {
        max_concurrent: 2,
        stop_on_first_error: true,
        retry: RetryStrategy {
            max_retries: 0,
            ..RetryStrategy::default()
        },
        ..BatchConfig::default()
    };
    let batch = ytbatch::BatchHandle::new(downloader, config);
    let refs: Vec<_> = (0..4).map(|n| VideoRef::new(vid(n), url_for(n))).collect();
    batch.add(refs, TaskConfig::default());
    batch.start().await;
    batch.join(Duration::from_secs(5)).await;

    let snap = batch.progress();
    assert_eq!(snap.status, Status::Cancelled);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.completed + snap.cancelled, 3);
}
