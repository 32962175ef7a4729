//! Album crawl orchestration.
//!
//! [`AlbumRipper`] wires the walker, extractor, resolver and fallback
//! coordinator together for one album. Pages are processed in pagination
//! order and entries in document order, one at a time: the shared rate
//! limiter serializes every request anyway.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::album::{AlbumUrl, site_origin};
use crate::context::CrawlContext;
use crate::download::{DownloadManager, DownloadRequest, FailureType};
use crate::error::RipError;
use crate::fallback::FallbackCoordinator;
use crate::listing::{ListingPage, PaginationWalker, extract_entries};
use crate::resolver::{AssetCandidate, AssetResolver, GuessPolicy, ResolutionMode, ResolveStrategy};

/// Per-crawl settings.
#[derive(Debug, Clone, Default)]
pub struct RipOptions {
    /// Default resolution strategy.
    pub strategy: ResolveStrategy,
    /// Thumbnail rewrite rules for guessed candidates.
    pub guess: GuessPolicy,
    /// Serve the album from this origin instead of the one in the album URL.
    pub base_url: Option<Url>,
    /// Minimum spacing of post page fetches; `None` means
    /// [`AUTHORITATIVE_INTERVAL`](crate::rate_limiter::AUTHORITATIVE_INTERVAL).
    pub post_page_interval: Option<Duration>,
}

/// Crawl counters, updated as the crawl progresses.
#[derive(Debug, Default)]
pub struct RipStats {
    pages: AtomicUsize,
    entries: AtomicUsize,
    guessed: AtomicUsize,
    authoritative: AtomicUsize,
    fallbacks: AtomicUsize,
    skipped: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of [`RipStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RipSummary {
    /// Listing pages processed.
    pub pages: usize,
    /// Listing entries seen.
    pub entries: usize,
    /// Guessed candidates produced.
    pub guessed: usize,
    /// Authoritative candidates produced.
    pub authoritative: usize,
    /// Guessed downloads replaced by an authoritative candidate.
    pub fallbacks: usize,
    /// Entries dropped because no candidate could be resolved.
    pub skipped: usize,
    /// Assets stored.
    pub downloaded: usize,
    /// Assets that failed for good.
    pub failed: usize,
}

impl RipStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing pages processed.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Listing entries seen.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    /// Assets stored.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Assets that failed for good.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> RipSummary {
        RipSummary {
            pages: self.pages(),
            entries: self.entries(),
            guessed: self.guessed.load(Ordering::SeqCst),
            authoritative: self.authoritative.load(Ordering::SeqCst),
            fallbacks: self.fallbacks.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            downloaded: self.downloaded(),
            failed: self.failed(),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn record_candidate(&self, candidate: &AssetCandidate) {
        match candidate.mode {
            ResolutionMode::Guessed => Self::bump(&self.guessed),
            ResolutionMode::Authoritative => Self::bump(&self.authoritative),
        }
    }
}

/// Crawls one album and feeds its assets to a download manager.
#[derive(Debug)]
pub struct AlbumRipper {
    album: AlbumUrl,
    ctx: CrawlContext,
    walker: PaginationWalker,
    resolver: Arc<AssetResolver>,
    coordinator: FallbackCoordinator,
    stats: Arc<RipStats>,
}

impl AlbumRipper {
    /// Prepares a crawl of `album` using the shared `ctx`.
    #[must_use]
    pub fn new(album: AlbumUrl, ctx: CrawlContext, options: RipOptions) -> Self {
        let start_url = options
            .base_url
            .as_ref()
            .map_or_else(|| album.url().clone(), |base| album.rebased_onto(base));
        let mut resolver = AssetResolver::new(
            ctx.clone(),
            site_origin(&start_url),
            options.strategy,
            options.guess,
        );
        if let Some(interval) = options.post_page_interval {
            resolver = resolver.with_post_page_interval(interval);
        }
        let resolver = Arc::new(resolver);
        Self {
            walker: PaginationWalker::new(ctx.clone(), start_url),
            coordinator: FallbackCoordinator::new(Arc::clone(&resolver)),
            resolver,
            album,
            ctx,
            stats: Arc::new(RipStats::new()),
        }
    }

    /// The album being crawled.
    #[must_use]
    pub fn album(&self) -> &AlbumUrl {
        &self.album
    }

    /// Live crawl counters.
    #[must_use]
    pub fn stats(&self) -> Arc<RipStats> {
        Arc::clone(&self.stats)
    }

    /// The resolver used by this crawl.
    #[must_use]
    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }

    /// Number of listing pages fetched.
    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.walker.pages_fetched()
    }

    /// Crawls the album and downloads every resolved asset.
    ///
    /// Per-entry problems (unresolvable posts, failed downloads) are logged
    /// and counted; the crawl continues.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::PageFetch`] when a listing page cannot be fetched
    /// and [`RipError::Cancelled`] when the crawl is cancelled.
    #[instrument(skip(self, manager), fields(gid = %self.album.gid()))]
    pub async fn rip(&self, manager: &dyn DownloadManager) -> Result<RipSummary, RipError> {
        info!(url = %self.album.url(), "ripping album");
        self.crawl(Some(manager), &mut Vec::new()).await?;
        let summary = self.stats.snapshot();
        info!(
            pages = summary.pages,
            downloaded = summary.downloaded,
            failed = summary.failed,
            "album finished"
        );
        Ok(summary)
    }

    /// Crawls the album and returns the resolved candidates without downloading.
    ///
    /// # Errors
    ///
    /// Same as [`rip`](Self::rip).
    #[instrument(skip(self), fields(gid = %self.album.gid()))]
    pub async fn collect_candidates(&self) -> Result<Vec<AssetCandidate>, RipError> {
        let mut candidates = Vec::new();
        self.crawl(None, &mut candidates).await?;
        Ok(candidates)
    }

    async fn crawl(
        &self,
        manager: Option<&dyn DownloadManager>,
        collected: &mut Vec<AssetCandidate>,
    ) -> Result<(), RipError> {
        let first = self.walker.first_page().await?;
        self.process_page(first, manager, collected).await?;

        let mut next = self.walker.next_page(first).await?;
        while let Some(page) = next {
            self.process_page(&page, manager, collected).await?;
            next = self.walker.next_page(&page).await?;
        }
        Ok(())
    }

    async fn process_page(
        &self,
        page: &ListingPage,
        manager: Option<&dyn DownloadManager>,
        collected: &mut Vec<AssetCandidate>,
    ) -> Result<(), RipError> {
        RipStats::bump(&self.stats.pages);
        let entries = extract_entries(page);
        debug!(url = %page.source_url(), entries = entries.len(), "processing listing page");

        for entry in entries {
            if self.ctx.is_cancelled() {
                return Err(RipError::cancelled(page.source_url().as_str()));
            }
            RipStats::bump(&self.stats.entries);

            let candidate = match self.resolver.resolve(&entry).await {
                Ok(candidate) => candidate,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(post_id = %entry.post_id, error = %e, "skipping entry");
                    RipStats::bump(&self.stats.skipped);
                    continue;
                }
            };
            self.stats.record_candidate(&candidate);

            match manager {
                Some(manager) => self.deliver(manager, candidate).await?,
                None => collected.push(candidate),
            }
        }
        Ok(())
    }

    /// Downloads a candidate, swapping in the authoritative one when a guess fails.
    async fn deliver(
        &self,
        manager: &dyn DownloadManager,
        candidate: AssetCandidate,
    ) -> Result<(), RipError> {
        let mut current = candidate;
        loop {
            self.coordinator.track(&current);
            let failure = match manager.enqueue(DownloadRequest::from(&current)).await {
                Ok(path) => {
                    self.coordinator.complete(&current.url);
                    RipStats::bump(&self.stats.downloaded);
                    debug!(post_id = %current.post_id, path = %path.display(), "asset stored");
                    return Ok(());
                }
                Err(failure) => failure,
            };

            if failure.kind == FailureType::Cancelled {
                self.coordinator.complete(&current.url);
                return Err(RipError::cancelled(&current.url));
            }

            match self.coordinator.on_download_failed(&current, &failure).await? {
                Some(replacement) => {
                    RipStats::bump(&self.stats.fallbacks);
                    self.stats.record_candidate(&replacement);
                    current = replacement;
                }
                None => {
                    RipStats::bump(&self.stats.failed);
                    error!(
                        post_id = %current.post_id,
                        url = %failure.url,
                        reason = %failure.reason,
                        "asset download failed"
                    );
                    return Ok(());
                }
            }
        }
    }
}
