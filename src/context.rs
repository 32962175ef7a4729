//! Crawl context threaded through every pipeline component.
//!
//! A [`CrawlContext`] bundles the HTTP client, the session cookie jar, the
//! shared rate limiter and the cancellation flag. Components receive it
//! explicitly instead of reaching for process-wide state, and every page
//! request goes through [`CrawlContext::fetch_page`] so the cancellation check
//! and the rate-limiter turn are never skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE, RETRY_AFTER};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::RipError;
use crate::http_client::{HttpTimeouts, build_http_client};
use crate::listing::Session;
use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

/// A fetched HTML document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: Url,
    /// Response body.
    pub body: String,
}

/// Shared per-crawl state.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    client: Client,
    session: Arc<Session>,
    rate_limiter: Arc<RateLimiter>,
    cancelled: Arc<AtomicBool>,
}

impl CrawlContext {
    /// Creates a context with a fresh session and default client policy.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::HttpClient`] when the client cannot be built.
    pub fn new(rate_limiter: Arc<RateLimiter>, timeouts: HttpTimeouts) -> Result<Self, RipError> {
        let client = build_http_client(&user_agent::default_page_user_agent(), timeouts)
            .map_err(|reason| RipError::HttpClient { reason })?;
        Ok(Self::with_client(client, rate_limiter))
    }

    /// Creates a context around an existing client.
    #[must_use]
    pub fn with_client(client: Client, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            session: Arc::new(Session::new()),
            rate_limiter,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the cancellation flag with one owned by the caller.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// The crawl session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Requests cancellation; takes effect before the next rate-limited operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checks for cancellation, then waits for the host's rate-limiter turn.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Cancelled`] when the crawl was cancelled.
    pub async fn wait_turn(&self, url: &str) -> Result<(), RipError> {
        self.wait_turn_spaced(url, Duration::ZERO).await
    }

    /// Like [`wait_turn`](Self::wait_turn) with a per-call minimum interval.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Cancelled`] when the crawl was cancelled.
    pub async fn wait_turn_spaced(&self, url: &str, min_interval: Duration) -> Result<(), RipError> {
        if self.is_cancelled() {
            debug!(url, "cancellation observed before rate-limited operation");
            return Err(RipError::cancelled(url));
        }
        self.rate_limiter.wait_turn_spaced(url, min_interval).await;
        Ok(())
    }

    /// Fetches an HTML page after taking a rate-limiter turn.
    ///
    /// Session cookies are attached when present. With `seed_session`, the
    /// response's cookies are merged into the session, which is then sealed.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Cancelled`] when cancelled before the request, and
    /// [`RipError::PageFetch`] for network failures, non-success statuses or
    /// unreadable bodies.
    pub async fn fetch_page(&self, url: &Url, seed_session: bool) -> Result<FetchedPage, RipError> {
        self.fetch_page_spaced(url, seed_session, Duration::ZERO).await
    }

    /// Fetches an HTML page whose rate-limiter turn is spaced by at least
    /// `min_interval`.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_page`](Self::fetch_page).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_page_spaced(
        &self,
        url: &Url,
        seed_session: bool,
        min_interval: Duration,
    ) -> Result<FetchedPage, RipError> {
        self.wait_turn_spaced(url.as_str(), min_interval).await?;

        let mut request = self.client.get(url.clone()).header(
            ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        );
        if let Some(cookie_header) = self.session.cookie_header() {
            request = request.header(COOKIE, cookie_header);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "page request failed");
            if e.is_timeout() {
                RipError::page_fetch(url.as_str(), "request timed out")
            } else {
                RipError::page_fetch(url.as_str(), format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            if let Some(delay) = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
            {
                self.rate_limiter
                    .record_retry_after(url.as_str(), delay)
                    .await;
            }
            warn!(url = %url, status = status.as_u16(), "page request returned error status");
            return Err(RipError::page_fetch(
                url.as_str(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        if seed_session {
            let cookies: Vec<(String, String)> = response
                .cookies()
                .map(|c| (c.name().to_string(), c.value().to_string()))
                .collect();
            self.session.merge_and_seal(cookies);
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| {
            warn!(url = %url, error = %e, "page body could not be read");
            RipError::page_fetch(url.as_str(), format!("unreadable body: {e}"))
        })?;
        debug!(bytes = body.len(), "page fetched");

        Ok(FetchedPage {
            url: final_url,
            body,
        })
    }
}
