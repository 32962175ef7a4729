//! Asset download boundary.
//!
//! The crawl hands every [`AssetCandidate`](crate::resolver::AssetCandidate)
//! to a [`DownloadManager`]. A failed download comes back as a
//! [`DownloadFailure`], which the pipeline passes to the
//! [`FallbackCoordinator`](crate::fallback::FallbackCoordinator).
//!
//! [`FileDownloader`] is the default manager: it streams assets to disk,
//! honors the shared per-host rate limiter and retries transient failures.

mod client;
mod error;
mod filename;
mod retry;

pub use client::FileDownloader;
pub use error::DownloadError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::resolver::AssetCandidate;

/// One asset registered with a download manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRequest {
    /// Absolute asset URL.
    pub url: String,
    /// Prefix prepended to the saved file name.
    pub filename_prefix: String,
    /// Post the asset belongs to.
    pub post_id: String,
}

impl From<&AssetCandidate> for DownloadRequest {
    fn from(candidate: &AssetCandidate) -> Self {
        Self {
            url: candidate.url.clone(),
            filename_prefix: candidate.filename_prefix(),
            post_id: candidate.post_id.clone(),
        }
    }
}

/// A download that did not complete, reported back to the crawl.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("download failed for {url}: {reason}")]
pub struct DownloadFailure {
    /// The URL that failed.
    pub url: String,
    /// Human-readable failure reason.
    pub reason: String,
    /// Classification of the last error.
    pub kind: FailureType,
}

impl DownloadFailure {
    /// Creates a failure report.
    #[must_use]
    pub fn new(url: impl Into<String>, reason: impl Into<String>, kind: FailureType) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
            kind,
        }
    }

    /// Builds a failure report from the error that ended the download.
    #[must_use]
    pub fn from_error(url: &str, error: &DownloadError) -> Self {
        Self::new(url, error.to_string(), classify_error(error))
    }
}

/// External download manager.
///
/// `enqueue` resolves once the asset is stored or has definitively failed;
/// the `Err` arm is the failure report the fallback path subscribes to.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    /// Registers an asset for download and waits for its outcome.
    async fn enqueue(&self, request: DownloadRequest) -> Result<PathBuf, DownloadFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionMode;

    #[test]
    fn test_request_from_candidate_carries_prefix() {
        let candidate = AssetCandidate {
            url: "https://cs.sankakucomplex.com/data/a.jpg?100".to_string(),
            post_id: "100".to_string(),
            mode: ResolutionMode::Guessed,
        };
        let request = DownloadRequest::from(&candidate);
        assert_eq!(request.url, candidate.url);
        assert_eq!(request.filename_prefix, "100_");
        assert_eq!(request.post_id, "100");
    }

    #[test]
    fn test_failure_from_error_classifies() {
        let url = "https://cs.sankakucomplex.com/data/a.jpg";
        let failure = DownloadFailure::from_error(url, &DownloadError::http_status(url, 404));
        assert_eq!(failure.kind, FailureType::Permanent);
        assert!(failure.reason.contains("404"));
        assert!(failure.to_string().contains(url));
    }
}
