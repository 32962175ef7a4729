//! Asset resolution: turning a listing entry into a downloadable URL.
//!
//! Two strategies exist. The guessed strategy rewrites the thumbnail URL and
//! costs nothing; the authoritative strategy fetches the post detail page and
//! costs one rate-limited request. Both are expressed through one state
//! machine per post:
//!
//! ```text
//! Start -> GuessAttempted -> Accepted(Guessed)
//!                         \-> AuthoritativeAttempted -> Accepted(Authoritative) | Failed
//! ```
//!
//! Authoritative resolution runs at most once per post id; later requests get
//! [`RipError::AuthoritativeExhausted`] without touching the network.

mod guess;
mod post_page;

pub use guess::{GuessPolicy, is_image_url};
pub use post_page::{absolutize_reference, extract_asset_reference, post_page_url};

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::context::CrawlContext;
use crate::error::RipError;
use crate::listing::ListingEntry;
use crate::rate_limiter::AUTHORITATIVE_INTERVAL;

/// How a candidate URL was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Derived from the thumbnail URL without a request.
    Guessed,
    /// Read from the post detail page.
    Authoritative,
}

/// A resolved asset URL handed to the download manager.
///
/// Never mutated: a failed guess is replaced by a new authoritative candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetCandidate {
    /// Absolute asset URL.
    pub url: String,
    /// Post the asset belongs to.
    pub post_id: String,
    /// Strategy that produced the URL.
    pub mode: ResolutionMode,
}

impl AssetCandidate {
    /// Prefix for the downloaded file name, mapping it back to its post.
    #[must_use]
    pub fn filename_prefix(&self) -> String {
        format!("{}_", self.post_id)
    }
}

/// Which strategy resolves entries by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStrategy {
    /// Guess first; fetch the post page only when the guess is impossible or
    /// its download fails.
    #[default]
    GuessFirst,
    /// Fetch every post page.
    Authoritative,
}

impl ResolveStrategy {
    /// Stable label used in config files and CLI flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GuessFirst => "guess-first",
            Self::Authoritative => "authoritative",
        }
    }
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolveStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guess-first" | "guess" => Ok(Self::GuessFirst),
            "authoritative" | "post-page" => Ok(Self::Authoritative),
            other => Err(format!(
                "unknown strategy '{other}' (expected 'guess-first' or 'authoritative')"
            )),
        }
    }
}

/// Per-post position in the resolution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Nothing attempted yet.
    Start,
    /// A guess is being derived.
    GuessAttempted,
    /// The post page is being fetched.
    AuthoritativeAttempted,
    /// A candidate was produced by the given strategy.
    Accepted(ResolutionMode),
    /// Authoritative resolution failed; the entry is skipped.
    Failed,
}

/// Resolves listing entries into asset candidates.
#[derive(Debug)]
pub struct AssetResolver {
    ctx: CrawlContext,
    site_origin: Url,
    strategy: ResolveStrategy,
    guess: GuessPolicy,
    post_page_interval: Duration,
    states: DashMap<String, ResolveState>,
    authoritative_attempted: DashSet<String>,
    authoritative_fetches: AtomicUsize,
}

impl AssetResolver {
    /// Creates a resolver whose post pages live on `site_origin`.
    #[must_use]
    pub fn new(
        ctx: CrawlContext,
        site_origin: Url,
        strategy: ResolveStrategy,
        guess: GuessPolicy,
    ) -> Self {
        Self {
            ctx,
            site_origin,
            strategy,
            guess,
            post_page_interval: AUTHORITATIVE_INTERVAL,
            states: DashMap::new(),
            authoritative_attempted: DashSet::new(),
            authoritative_fetches: AtomicUsize::new(0),
        }
    }

    /// Sets the minimum spacing of post page requests.
    ///
    /// Defaults to [`AUTHORITATIVE_INTERVAL`] whatever the limiter's own
    /// interval is, since post pages are what the site throttles.
    #[must_use]
    pub fn with_post_page_interval(mut self, interval: Duration) -> Self {
        self.post_page_interval = interval;
        self
    }

    /// Minimum spacing of post page requests.
    #[must_use]
    pub fn post_page_interval(&self) -> Duration {
        self.post_page_interval
    }

    /// The default strategy.
    #[must_use]
    pub fn strategy(&self) -> ResolveStrategy {
        self.strategy
    }

    /// Current state for a post.
    #[must_use]
    pub fn state(&self, post_id: &str) -> ResolveState {
        self.states
            .get(post_id)
            .map_or(ResolveState::Start, |state| *state)
    }

    /// Number of post pages fetched so far.
    #[must_use]
    pub fn authoritative_fetches(&self) -> usize {
        self.authoritative_fetches.load(Ordering::SeqCst)
    }

    /// Derives a guessed candidate for `entry`.
    ///
    /// Pure: no request, no state change. `None` when the entry has no
    /// preview thumbnail to rewrite.
    #[must_use]
    pub fn guess(&self, entry: &ListingEntry) -> Option<AssetCandidate> {
        let thumbnail = entry.thumbnail_url.as_ref()?;
        let url = self.guess.guess_url(thumbnail, &entry.post_id)?;
        Some(AssetCandidate {
            url,
            post_id: entry.post_id.clone(),
            mode: ResolutionMode::Guessed,
        })
    }

    /// Resolves an entry with the default strategy.
    ///
    /// Under [`ResolveStrategy::GuessFirst`] an entry whose thumbnail cannot
    /// be rewritten goes straight to the post page.
    ///
    /// # Errors
    ///
    /// Errors from [`resolve_authoritative`](Self::resolve_authoritative).
    pub async fn resolve(&self, entry: &ListingEntry) -> Result<AssetCandidate, RipError> {
        if self.strategy == ResolveStrategy::GuessFirst {
            self.set_state(&entry.post_id, ResolveState::GuessAttempted);
            if let Some(candidate) = self.guess(entry) {
                debug!(post_id = %entry.post_id, url = %candidate.url, "guessed asset URL");
                self.set_state(
                    &entry.post_id,
                    ResolveState::Accepted(ResolutionMode::Guessed),
                );
                return Ok(candidate);
            }
            debug!(post_id = %entry.post_id, "thumbnail not guessable; fetching post page");
        }
        self.resolve_authoritative(&entry.post_id).await
    }

    /// Resolves a post by fetching its detail page, once per post id.
    ///
    /// Takes one rate-limiter turn for the fetch and, after a success,
    /// another before returning since callers usually chain straight into the
    /// next resolution. Both turns are spaced by at least the post page
    /// interval.
    ///
    /// # Errors
    ///
    /// - [`RipError::AuthoritativeExhausted`] when already attempted for this post
    /// - [`RipError::PageFetch`] when the post page cannot be fetched
    /// - [`RipError::AssetNotFound`] when the page carries no asset link
    /// - [`RipError::Cancelled`] when the crawl was cancelled first
    #[instrument(skip(self))]
    pub async fn resolve_authoritative(&self, post_id: &str) -> Result<AssetCandidate, RipError> {
        if !self.authoritative_attempted.insert(post_id.to_string()) {
            debug!("authoritative resolution already attempted");
            return Err(RipError::authoritative_exhausted(post_id));
        }
        self.set_state(post_id, ResolveState::AuthoritativeAttempted);

        let Some(post_url) = post_page_url(&self.site_origin, post_id) else {
            self.set_state(post_id, ResolveState::Failed);
            return Err(RipError::page_fetch(
                self.site_origin.as_str(),
                format!("cannot build post page URL for post {post_id}"),
            ));
        };
        info!(url = %post_url, "fetching post page");

        let page = match self
            .ctx
            .fetch_page_spaced(&post_url, false, self.post_page_interval)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.set_state(post_id, ResolveState::Failed);
                return Err(e);
            }
        };
        self.authoritative_fetches.fetch_add(1, Ordering::SeqCst);

        let Some(url) = extract_asset_reference(&page.body)
            .and_then(|reference| absolutize_reference(&reference, &page.url))
        else {
            self.set_state(post_id, ResolveState::Failed);
            warn!(url = %post_url, "couldn't find an image URL on post page");
            return Err(RipError::asset_not_found(post_id, post_url.as_str()));
        };
        info!(url = %url, "resolved asset link from post page");
        self.set_state(
            post_id,
            ResolveState::Accepted(ResolutionMode::Authoritative),
        );

        if let Err(e) = self
            .ctx
            .wait_turn_spaced(post_url.as_str(), self.post_page_interval)
            .await
        {
            debug!(error = %e, "cancelled after post page fetch; returning resolved candidate");
        }

        Ok(AssetCandidate {
            url,
            post_id: post_id.to_string(),
            mode: ResolutionMode::Authoritative,
        })
    }

    fn set_state(&self, post_id: &str, state: ResolveState) {
        self.states.insert(post_id.to_string(), state);
    }
}
