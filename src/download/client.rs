//! Default download manager that streams assets to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::filename::{asset_filename, resolve_unique_path};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, DownloadFailure, DownloadManager, DownloadRequest};
use crate::error::RipError;
use crate::http_client::{HttpTimeouts, build_http_client};
use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

/// Streams assets into one album directory.
///
/// Every attempt takes a turn on the shared [`RateLimiter`] for the asset's
/// host, so downloads never bypass the crawl's throttling.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ripper_core::{HttpTimeouts, RateLimiter};
/// # use ripper_core::download::{DownloadManager, DownloadRequest, FileDownloader};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Arc::new(RateLimiter::new(ripper_core::GUESS_INTERVAL));
/// let downloader = FileDownloader::new("./rips/sankakucomplex_idol_tag", limiter, HttpTimeouts::default())?;
/// let path = downloader
///     .enqueue(DownloadRequest {
///         url: "https://cs.sankakucomplex.com/data/ab/cd/abcd.jpg?100".to_string(),
///         filename_prefix: "100_".to_string(),
///         post_id: "100".to_string(),
///     })
///     .await?;
/// println!("saved to {}", path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileDownloader {
    client: Client,
    target_dir: PathBuf,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cancelled: Arc<AtomicBool>,
}

impl FileDownloader {
    /// Creates a downloader writing into `target_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::HttpClient`] when the client cannot be built.
    pub fn new(
        target_dir: impl Into<PathBuf>,
        rate_limiter: Arc<RateLimiter>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, RipError> {
        let client = build_http_client(&user_agent::default_download_user_agent(), timeouts)
            .map_err(|reason| RipError::HttpClient { reason })?;
        Ok(Self::with_client(client, target_dir, rate_limiter))
    }

    /// Creates a downloader around an existing client.
    #[must_use]
    pub fn with_client(
        client: Client,
        target_dir: impl Into<PathBuf>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            target_dir: target_dir.into(),
            rate_limiter,
            retry: RetryPolicy::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shares the crawl's cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Directory assets are written to.
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    async fn download_once(
        &self,
        url: &Url,
        request: &DownloadRequest,
    ) -> Result<PathBuf, DownloadError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DownloadError::cancelled(url.as_str()));
        }
        self.rate_limiter.wait_turn(url.as_str()).await;

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url.as_str())
            } else {
                DownloadError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        tokio::fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| DownloadError::io(self.target_dir.clone(), e))?;

        let file_path = resolve_unique_path(
            &self.target_dir,
            &asset_filename(url, &request.filename_prefix),
        );
        debug!(path = %file_path.display(), "resolved output path");

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| DownloadError::io(file_path.clone(), e))?;

        let bytes = match stream_to_file(&mut file, response, url.as_str(), &file_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %file_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(e);
            }
        };

        info!(path = %file_path.display(), bytes, "download complete");
        Ok(file_path)
    }
}

#[async_trait]
impl DownloadManager for FileDownloader {
    #[instrument(skip(self, request), fields(url = %request.url, post_id = %request.post_id))]
    async fn enqueue(&self, request: DownloadRequest) -> Result<PathBuf, DownloadFailure> {
        let url = Url::parse(&request.url).map_err(|_| {
            warn!("asset URL is malformed");
            DownloadFailure::from_error(&request.url, &DownloadError::invalid_url(&request.url))
        })?;

        let mut attempt = 1;
        loop {
            let error = match self.download_once(&url, &request).await {
                Ok(path) => return Ok(path),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            if failure_type == FailureType::RateLimited
                && let Some(delay) = error.retry_after().and_then(parse_retry_after)
            {
                self.rate_limiter
                    .record_retry_after(url.as_str(), delay)
                    .await;
            }

            match self.retry.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        error = %error,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "download failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(error = %error, attempt, %reason, "download failed");
                    return Err(DownloadFailure::from_error(url.as_str(), &error));
                }
            }
        }
    }
}

/// Streams the response body to `file`, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}
