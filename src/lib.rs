//! Sankaku Ripper Core Library
//!
//! Crawls a `sankakucomplex.com` tag listing page by page, turns every
//! thumbnail into a downloadable asset URL and hands the URLs to a download
//! manager, all under one per-host rate limiter.
//!
//! # Architecture
//!
//! - [`album`] - album URL validation and gallery id extraction
//! - [`listing`] - session cookies, listing pages, pagination, entries
//! - [`resolver`] - guessed and authoritative asset resolution
//! - [`fallback`] - one-shot guessed-to-authoritative fallback
//! - [`download`] - download manager boundary and the default file downloader
//! - [`ripper`] - crawl orchestration and statistics
//! - [`rate_limiter`] - per-host request spacing
//! - [`config`] - TOML file defaults

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod album;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod fallback;
pub mod http_client;
pub mod listing;
pub mod rate_limiter;
pub mod resolver;
pub mod ripper;
mod user_agent;

// Re-export commonly used types
pub use album::{AlbumUrl, get_gid};
pub use context::CrawlContext;
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadFailure, DownloadManager, DownloadRequest, FileDownloader,
    RetryPolicy,
};
pub use error::RipError;
pub use fallback::FallbackCoordinator;
pub use http_client::HttpTimeouts;
pub use rate_limiter::{AUTHORITATIVE_INTERVAL, GUESS_INTERVAL, RateLimiter};
pub use resolver::{AssetCandidate, AssetResolver, GuessPolicy, ResolutionMode, ResolveStrategy};
pub use ripper::{AlbumRipper, RipOptions, RipStats, RipSummary};
