//! Reference `Downloader` built on plain HTTP GET + streamed body.
//!
//! Not a YouTube client: it exists to give the orchestrator one concrete,
//! production-shaped implementation to exercise against, the same role
//! `SimpleDownloadEngine` played for the single-host download engine this
//! module is descended from.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::model::{ErrorKind, Outcome, TaskConfig};

use super::contract::{Downloader, ProgressSink};

pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("ytbatch/0.1")
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    fn destination_for(config: &TaskConfig, url: &str) -> PathBuf {
        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download.bin");
        Path::new(&config.output_directory).join(name)
    }

    async fn stream_to_file(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<(), (ErrorKind, String)> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| (ErrorKind::Filesystem, e.to_string()))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| (classify_reqwest_error(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let kind = classify_http_status(status.as_u16());
            return Err((kind, format!("HTTP status {status}")));
        }

        let total_size = response.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| (ErrorKind::Filesystem, e.to_string()))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        let mut last_report = Instant::now();
        let report_interval = std::time::Duration::from_millis(200);

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err((ErrorKind::Cancelled, "cancelled".to_string()));
            }
            let chunk = chunk.map_err(|e| (classify_reqwest_error(&e), e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| (ErrorKind::Filesystem, e.to_string()))?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= report_interval {
                if total_size > 0 {
                    progress((downloaded as f64 / total_size as f64).min(1.0));
                }
                last_report = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|e| (ErrorKind::Filesystem, e.to_string()))?;
        progress(1.0);
        Ok(())
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() || err.is_connect() {
        ErrorKind::Network
    } else if let Some(status) = err.status() {
        classify_http_status(status.as_u16())
    } else {
        ErrorKind::Unknown
    }
}

fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Authentication,
        400 | 404 | 410 => ErrorKind::InvalidInput,
        408 | 425 | 429 | 500..=599 => ErrorKind::Network,
        _ => ErrorKind::Unknown,
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        url: &str,
        config: &TaskConfig,
        cancel: CancellationToken,
        progress: ProgressSink,
    ) -> Outcome {
        let destination = Self::destination_for(config, url);
        let attempt = self.stream_to_file(url, &destination, &cancel, &progress);
        let result = match config.timeout {
            Some(budget) => match tokio::time::timeout(budget, attempt).await {
                Ok(result) => result,
                Err(_) => Err((ErrorKind::Network, format!("timed out after {budget:?}"))),
            },
            None => attempt.await,
        };
        match result {
            Ok(()) => Outcome::Success,
            Err((kind, message)) => Outcome::Failure { kind, message },
        }
    }
}
