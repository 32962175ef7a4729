//! Pagination walker.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use url::Url;

use super::ListingPage;
use crate::context::CrawlContext;
use crate::error::RipError;

/// Walks a listing from its first page along `next-page-url` pointers.
///
/// Never retries; a failed fetch surfaces as [`RipError::PageFetch`] and
/// retry policy is left to the caller. A page URL is fetched at most once per
/// walker, which also cuts pointer cycles.
#[derive(Debug)]
pub struct PaginationWalker {
    ctx: CrawlContext,
    start_url: Url,
    first: OnceCell<ListingPage>,
    visited: Mutex<HashSet<String>>,
    pages_fetched: AtomicUsize,
}

impl PaginationWalker {
    /// Creates a walker starting at `start_url`.
    #[must_use]
    pub fn new(ctx: CrawlContext, start_url: Url) -> Self {
        Self {
            ctx,
            start_url,
            first: OnceCell::new(),
            visited: Mutex::new(HashSet::new()),
            pages_fetched: AtomicUsize::new(0),
        }
    }

    /// Number of listing pages fetched so far.
    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    /// Returns the first page, fetching it on the first call only.
    ///
    /// The first response seeds the session cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::PageFetch`] or [`RipError::Cancelled`].
    #[instrument(skip(self), fields(url = %self.start_url))]
    pub async fn first_page(&self) -> Result<&ListingPage, RipError> {
        self.first
            .get_or_try_init(|| async {
                self.mark_visited(&self.start_url);
                let fetched = self.ctx.fetch_page(&self.start_url, true).await?;
                self.pages_fetched.fetch_add(1, Ordering::SeqCst);
                self.mark_visited(&fetched.url);
                info!(url = %fetched.url, "fetched first listing page");
                Ok::<_, RipError>(ListingPage::parse(fetched.url, fetched.body))
            })
            .await
    }

    /// Fetches the page after `page`, or returns `None` on the last page.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::PageFetch`] or [`RipError::Cancelled`].
    #[instrument(skip(self, page), fields(url = %page.source_url()))]
    pub async fn next_page(&self, page: &ListingPage) -> Result<Option<ListingPage>, RipError> {
        let Some(next_url) = page.next_page_url() else {
            info!("no next page; listing finished");
            return Ok(None);
        };

        if !self.mark_visited(next_url) {
            warn!(next = %next_url, "next page pointer revisits a fetched page; stopping");
            return Ok(None);
        }

        let fetched = self.ctx.fetch_page(next_url, false).await?;
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        self.mark_visited(&fetched.url);
        info!(url = %fetched.url, "fetched listing page");
        Ok(Some(ListingPage::parse(fetched.url, fetched.body)))
    }

    /// Records a URL as visited; returns false when it already was.
    fn mark_visited(&self, url: &Url) -> bool {
        self.visited
            .lock()
            .map(|mut visited| visited.insert(url.as_str().to_string()))
            .unwrap_or(true)
    }
}
