//! Guessed-to-authoritative fallback after a failed download.
//!
//! A guessed URL is only a bet on the asset's location. When its download
//! fails, the coordinator replaces it with one authoritative candidate read
//! from the post page. Each post falls back at most once; an authoritative
//! candidate that fails is terminal.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadFailure, FailureType};
use crate::error::RipError;
use crate::resolver::{AssetCandidate, AssetResolver, ResolutionMode, is_image_url};

/// Tracks in-flight candidates and drives the one-shot fallback.
#[derive(Debug)]
pub struct FallbackCoordinator {
    resolver: Arc<AssetResolver>,
    pending: DashMap<String, AssetCandidate>,
    fallen_back: DashSet<String>,
}

impl FallbackCoordinator {
    /// Creates a coordinator that resolves through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<AssetResolver>) -> Self {
        Self {
            resolver,
            pending: DashMap::new(),
            fallen_back: DashSet::new(),
        }
    }

    /// Registers a candidate handed to the download manager.
    pub fn track(&self, candidate: &AssetCandidate) {
        self.pending
            .insert(candidate.url.clone(), candidate.clone());
    }

    /// Drops a candidate whose download finished.
    pub fn complete(&self, url: &str) {
        self.pending.remove(url);
    }

    /// Number of candidates still awaiting an outcome.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns whether `post_id` already used its fallback.
    #[must_use]
    pub fn has_fallen_back(&self, post_id: &str) -> bool {
        self.fallen_back.contains(post_id)
    }

    /// Handles a failed download and returns the replacement candidate, if any.
    ///
    /// Only guessed candidates for image URLs are eligible. The failed
    /// candidate leaves the pending set either way. `Ok(None)` means the
    /// failure is terminal; when authoritative resolution itself fails, the
    /// original download failure is what gets reported.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Cancelled`] when the crawl was cancelled before the
    /// post page could be fetched.
    #[instrument(skip(self, failure), fields(post_id = %candidate.post_id, url = %candidate.url))]
    pub async fn on_download_failed(
        &self,
        candidate: &AssetCandidate,
        failure: &DownloadFailure,
    ) -> Result<Option<AssetCandidate>, RipError> {
        self.pending.remove(&candidate.url);

        if candidate.mode == ResolutionMode::Authoritative {
            warn!(reason = %failure.reason, "authoritative download failed");
            return Ok(None);
        }
        if failure.kind == FailureType::Cancelled {
            debug!("download cancelled; no fallback");
            return Ok(None);
        }
        if !is_image_url(&candidate.url) {
            warn!(reason = %failure.reason, "guessed download failed for a non-image URL");
            return Ok(None);
        }
        if !self.fallen_back.insert(candidate.post_id.clone()) {
            warn!(reason = %failure.reason, "fallback already used for this post");
            return Ok(None);
        }

        info!(reason = %failure.reason, "guessed download failed; resolving from post page");
        match self.resolver.resolve_authoritative(&candidate.post_id).await {
            Ok(replacement) => {
                self.track(&replacement);
                Ok(Some(replacement))
            }
            Err(e) if e.is_cancelled() => {
                debug!("cancelled before the post page fetch");
                Err(e)
            }
            Err(e) => {
                warn!(
                    reason = %failure.reason,
                    fallback_error = %e,
                    "download failed and post page gave no replacement"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;
    use crate::context::CrawlContext;
    use crate::http_client::HttpTimeouts;
    use crate::rate_limiter::RateLimiter;
    use crate::resolver::{GuessPolicy, ResolveStrategy};

    fn coordinator() -> FallbackCoordinator {
        let ctx =
            CrawlContext::new(Arc::new(RateLimiter::disabled()), HttpTimeouts::default()).unwrap();
        ctx.cancel();
        let resolver = AssetResolver::new(
            ctx,
            Url::parse("https://idol.sankakucomplex.com").unwrap(),
            ResolveStrategy::GuessFirst,
            GuessPolicy::default(),
        );
        FallbackCoordinator::new(Arc::new(resolver))
    }

    fn candidate(url: &str, mode: ResolutionMode) -> AssetCandidate {
        AssetCandidate {
            url: url.to_string(),
            post_id: "200".to_string(),
            mode,
        }
    }

    fn not_found(url: &str) -> DownloadFailure {
        DownloadFailure::new(url, "HTTP 404", FailureType::Permanent)
    }

    #[tokio::test]
    async fn test_authoritative_failure_is_terminal() {
        let coordinator = coordinator();
        let failed = candidate(
            "https://cs.sankakucomplex.com/data/a.png",
            ResolutionMode::Authoritative,
        );
        coordinator.track(&failed);

        let replacement = coordinator
            .on_download_failed(&failed, &not_found(&failed.url))
            .await
            .unwrap();

        assert!(replacement.is_none());
        assert_eq!(coordinator.pending_len(), 0);
        assert!(!coordinator.has_fallen_back("200"));
    }

    #[tokio::test]
    async fn test_non_image_guess_is_not_eligible() {
        let coordinator = coordinator();
        let failed = candidate(
            "https://cs.sankakucomplex.com/data/a.mp4?200",
            ResolutionMode::Guessed,
        );
        let replacement = coordinator
            .on_download_failed(&failed, &not_found(&failed.url))
            .await
            .unwrap();
        assert!(replacement.is_none());
        assert!(!coordinator.has_fallen_back("200"));
    }

    #[tokio::test]
    async fn test_cancelled_download_does_not_consume_fallback() {
        let coordinator = coordinator();
        let failed = candidate(
            "https://cs.sankakucomplex.com/data/a.jpg?200",
            ResolutionMode::Guessed,
        );
        let failure = DownloadFailure::new(&failed.url, "cancelled", FailureType::Cancelled);
        let replacement = coordinator.on_download_failed(&failed, &failure).await.unwrap();
        assert!(replacement.is_none());
        assert!(!coordinator.has_fallen_back("200"));
    }

    #[tokio::test]
    async fn test_fallback_fires_once_per_post() {
        let coordinator = coordinator();
        let failed = candidate(
            "https://cs.sankakucomplex.com/data/a.jpg?200",
            ResolutionMode::Guessed,
        );
        coordinator.track(&failed);

        // The context is cancelled, so the authoritative attempt fails without a request.
        let first = coordinator
            .on_download_failed(&failed, &not_found(&failed.url))
            .await
            .unwrap_err();
        assert!(first.is_cancelled());
        assert!(coordinator.has_fallen_back("200"));
        assert_eq!(coordinator.pending_len(), 0);

        let second = coordinator
            .on_download_failed(&failed, &not_found(&failed.url))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(coordinator.resolver.authoritative_fetches(), 0);
    }

    #[test]
    fn test_complete_removes_pending() {
        let coordinator = coordinator();
        let done = candidate(
            "https://cs.sankakucomplex.com/data/a.jpg?200",
            ResolutionMode::Guessed,
        );
        coordinator.track(&done);
        assert_eq!(coordinator.pending_len(), 1);
        coordinator.complete(&done.url);
        assert_eq!(coordinator.pending_len(), 0);
    }
}
