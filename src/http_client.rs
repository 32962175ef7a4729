//! Shared HTTP client construction policy.
//!
//! Centralizes timeout, user-agent, compression and proxy defaults so the
//! page fetcher and the asset downloader behave the same way on the wire.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

/// Default connect timeout for page and asset requests.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for listing and post pages.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Timeouts applied to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Connect timeout in seconds.
    pub connect_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: CONNECT_TIMEOUT_SECS,
            read_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// Builds a client using shared project policy.
///
/// Cookies are not stored by the client: the crawl session attaches them
/// explicitly so that only the first listing page can change them.
///
/// # Errors
///
/// Returns the builder error description when construction fails.
pub fn build_http_client(user_agent: &str, timeouts: HttpTimeouts) -> Result<Client, String> {
    match try_build_client(user_agent, timeouts, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings; env proxies still apply on the fallback path.
            warn!("HTTP client hit system proxy panic; using env-proxy fallback builder");
            match try_build_client(user_agent, timeouts, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => {
                    Err("HTTP client construction panicked".to_string())
                }
                Err(BuildClientFailure::Build(error)) => Err(error.to_string()),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(error.to_string()),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    user_agent: &str,
    timeouts: HttpTimeouts,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let user_agent = user_agent.to_string();
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.read_secs))
            .user_agent(user_agent)
            .gzip(true);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(resolved) = env_proxy_for_scheme("https").and_then(|p| Proxy::https(&p).ok()) {
        builder = builder.proxy(resolved);
    }
    if let Some(resolved) = env_proxy_for_scheme("http").and_then(|p| Proxy::http(&p).ok()) {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
