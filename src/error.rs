//! Error types for album ripping operations.
//!
//! Follows the What/Why/Fix pattern used across the project: every variant
//! carries the offending URL (or post id) and a human-readable reason.

use thiserror::Error;

/// Errors raised by the listing walker, entry extractor and asset resolver.
///
/// Invalid album URLs, listing page fetch failures and cancellation abort a
/// crawl. Post page failures and missing asset links only skip one entry.
#[derive(Debug, Clone, Error)]
pub enum RipError {
    /// The album URL does not match the tag-query shape.
    #[error("invalid album URL '{url}': {reason}\n  Suggestion: {suggestion}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Why the URL was rejected
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// A listing page or post page could not be fetched or read.
    #[error("failed to fetch page '{url}': {reason}")]
    PageFetch {
        /// The page URL that was being fetched
        url: String,
        /// Network, status or body failure description
        reason: String,
    },

    /// The post page was fetched but carried no asset link.
    #[error("no asset link found for post {post_id} at '{url}'")]
    AssetNotFound {
        /// The post whose asset could not be located
        post_id: String,
        /// The post page that was inspected
        url: String,
    },

    /// Authoritative resolution already ran for this post.
    #[error("authoritative resolution already attempted for post {post_id}")]
    AuthoritativeExhausted {
        /// The post that was already resolved once
        post_id: String,
    },

    /// The crawl was cancelled between two rate-limited operations.
    #[error("crawl cancelled before requesting '{url}'")]
    Cancelled {
        /// The request that was about to be issued
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    HttpClient {
        /// Builder failure description
        reason: String,
    },
}

impl RipError {
    /// Creates an `InvalidUrl` error for a URL outside the accepted album shape.
    #[must_use]
    pub fn invalid_url(url: &str, reason: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
            suggestion: "Expected a tag listing such as https://idol.sankakucomplex.com/?tags=something"
                .to_string(),
        }
    }

    /// Creates a `PageFetch` error.
    #[must_use]
    pub fn page_fetch(url: &str, reason: impl Into<String>) -> Self {
        Self::PageFetch {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `AssetNotFound` error.
    #[must_use]
    pub fn asset_not_found(post_id: &str, url: &str) -> Self {
        Self::AssetNotFound {
            post_id: post_id.to_string(),
            url: url.to_string(),
        }
    }

    /// Creates an `AuthoritativeExhausted` error.
    #[must_use]
    pub fn authoritative_exhausted(post_id: &str) -> Self {
        Self::AuthoritativeExhausted {
            post_id: post_id.to_string(),
        }
    }

    /// Creates a `Cancelled` error.
    #[must_use]
    pub fn cancelled(url: &str) -> Self {
        Self::Cancelled {
            url: url.to_string(),
        }
    }

    /// Returns true for a cooperative cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_message_has_suggestion() {
        let err = RipError::invalid_url("https://example.com/", "host is not sankakucomplex.com");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/"), "should contain URL");
        assert!(msg.contains("sankakucomplex.com"), "should contain reason");
        assert!(msg.contains("Suggestion"), "should have suggestion");
    }

    #[test]
    fn test_page_fetch_message_contains_url() {
        let err = RipError::page_fetch("https://idol.sankakucomplex.com/?tags=a", "HTTP 503");
        let msg = err.to_string();
        assert!(msg.contains("tags=a"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(RipError::cancelled("x").is_cancelled());
        assert!(!RipError::page_fetch("x", "y").is_cancelled());
        assert!(!RipError::asset_not_found("100", "x").is_cancelled());
    }
}
