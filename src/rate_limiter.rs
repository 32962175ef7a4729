//! Per-host request serialization.
//!
//! [`RateLimiter::wait_turn`] blocks the caller until the configured minimum
//! interval has elapsed since the previous call for the same host returned.
//! Listing page fetches, post page fetches and asset downloads all draw from
//! one shared limiter, so every call site targeting a host shares one clock.
//! Hosts are tracked independently: throttling the listing host never slows
//! the asset host down.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ripper_core::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(2500)));
//!
//! // First request to a host proceeds immediately
//! limiter.wait_turn("https://idol.sankakucomplex.com/?tags=foo").await;
//!
//! // Second request to the same host waits out the interval
//! limiter.wait_turn("https://idol.sankakucomplex.com/post/show/1").await;
//!
//! // Another host has its own clock
//! limiter.wait_turn("https://is.sankakucomplex.com/data/ab/cd/abcd.jpg").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Interval the site tolerates when every entry costs a post page fetch.
pub const AUTHORITATIVE_INTERVAL: Duration = Duration::from_millis(2500);

/// Interval used when only listing pages are fetched (guessed candidates).
pub const GUESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Warning threshold for cumulative delay per host (60 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter.
///
/// Designed to be wrapped in `Arc` and shared by every component of a crawl,
/// and by concurrent crawls against the same host. `DashMap` holds per-host
/// state; the per-host `tokio::sync::Mutex` makes the read-sleep-update of the
/// last-call timestamp atomic relative to concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,

    disabled: bool,

    /// Arc'd so the `DashMap` shard lock is released before awaiting the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// `None` until the first call for this host returns.
    last_call: Mutex<Option<Instant>>,

    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            last_call: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter enforcing `interval` between calls to the same host.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            interval,
            disabled: interval.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether waiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the interval has elapsed since the previous call for the
    /// host of `url` returned.
    ///
    /// The first call for a host returns immediately.
    pub async fn wait_turn(&self, url: &str) {
        self.wait_turn_spaced(url, Duration::ZERO).await;
    }

    /// Like [`wait_turn`](Self::wait_turn), but spaces this call by at least
    /// `min_interval` when that is longer than the configured interval.
    ///
    /// Post page fetches use this with [`AUTHORITATIVE_INTERVAL`] so they stay
    /// slow even when the limiter runs at [`GUESS_INTERVAL`]. A disabled
    /// limiter never waits.
    #[instrument(skip(self), fields(host))]
    pub async fn wait_turn_spaced(&self, url: &str, min_interval: Duration) {
        if self.disabled {
            return;
        }
        let interval = self.interval.max(min_interval);

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut last_call = state.last_call.lock().await;

        if let Some(previous) = *last_call {
            let ready_at = previous + interval;
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "waiting for rate limit turn"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "spent over a minute waiting on this host; the album is large"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(host = %host, "first request to host - no delay");
        }

        *last_call = Some(Instant::now());
    }

    /// Pushes the host's clock forward by a server-mandated delay.
    ///
    /// The next [`wait_turn`](Self::wait_turn) for the host waits at least
    /// `delay` plus the regular interval from now.
    #[instrument(skip(self), fields(host))]
    pub async fn record_retry_after(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();
        state.add_cumulative_delay(delay);

        let mut last_call = state.last_call.lock().await;
        *last_call = Some(Instant::now() + delay);
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server retry-after");
    }
}

/// Extracts the lowercase host of a URL, or `"unknown"` for malformed input
/// so that every request is still serialized.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` for unparseable or negative values; caps at one hour.
///
/// ```
/// use std::time::Duration;
/// use ripper_core::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    Some(
        datetime
            .duration_since(std::time::SystemTime::now())
            .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
    )
}
