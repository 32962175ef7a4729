//! Album URL validation and gallery identifier extraction.
//!
//! An album is a tag listing on a `sankakucomplex.com` subdomain. Parsing an
//! [`AlbumUrl`] is the entry gate for the whole pipeline: nothing is fetched
//! for input that does not match the tag-query shape.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::RipError;

/// Short host identity used for output folder naming.
pub const HOST: &str = "sankakucomplex";

/// Registrable domain every album must live on.
pub const DOMAIN: &str = "sankakucomplex.com";

/// Subdomain label used in the gallery id when the album URL has none.
const BARE_DOMAIN_LABEL: &str = "www";

static ALBUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:([a-zA-Z0-9]+)\.)?sankakucomplex\.com/.*tags=([^&]+).*$")
        .unwrap_or_else(|e| panic!("invalid static album regex: {e}"))
});

/// A validated tag-listing URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumUrl {
    url: Url,
    subdomain: Option<String>,
    tag: String,
    gid: String,
}

impl AlbumUrl {
    /// Validates `input` and extracts the gallery identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::InvalidUrl`] when the input is not an
    /// `http(s)://[subdomain.]sankakucomplex.com/...tags=VALUE...` URL or the
    /// tag value does not percent-decode to UTF-8.
    pub fn parse(input: &str) -> Result<Self, RipError> {
        let trimmed = input.trim();
        let Some(caps) = ALBUM_RE.captures(trimmed) else {
            return Err(RipError::invalid_url(
                trimmed,
                "expected a sankakucomplex.com URL with a tags= query",
            ));
        };
        let url = Url::parse(trimmed).map_err(|e| RipError::invalid_url(trimmed, &e.to_string()))?;

        let subdomain = caps.get(1).map(|m| m.as_str().to_string());
        let raw_tag = caps.get(2).map_or("", |m| m.as_str());
        let tag = percent_decode_tag(raw_tag)
            .ok_or_else(|| RipError::invalid_url(trimmed, "cannot decode tag value"))?;

        let gid = format!(
            "{}_{tag}",
            subdomain.as_deref().unwrap_or(BARE_DOMAIN_LABEL)
        );
        debug!(url = %url, gid = %gid, "album URL accepted");

        Ok(Self {
            url,
            subdomain,
            tag,
            gid,
        })
    }

    /// The album URL as given by the user.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The subdomain label as written in the URL, if it had one.
    #[must_use]
    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    /// The percent-decoded tag value.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Gallery identifier: `subdomain + "_" + decoded tag`.
    #[must_use]
    pub fn gid(&self) -> &str {
        &self.gid
    }

    /// Folder name downloads for this album are written into.
    #[must_use]
    pub fn folder_name(&self) -> String {
        format!("{HOST}_{}", self.gid)
    }

    /// Returns the album URL with its origin replaced by `base`.
    ///
    /// Path and query are kept. Used to point the crawl at a mirror or a
    /// local test server while keeping the validated gallery id.
    #[must_use]
    pub fn rebased_onto(&self, base: &Url) -> Url {
        let mut rebased = base.clone();
        rebased.set_path(self.url.path());
        rebased.set_query(self.url.query());
        rebased
    }
}

/// Extracts the gallery identifier from an album URL.
///
/// # Errors
///
/// Returns [`RipError::InvalidUrl`] when the URL is not a tag listing.
pub fn get_gid(url: &str) -> Result<String, RipError> {
    AlbumUrl::parse(url).map(|album| album.gid)
}

/// Decodes form-style percent encoding (`+` is a space).
fn percent_decode_tag(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(std::borrow::Cow::into_owned)
}

/// Returns the site root (`scheme://host[:port]/`) a listing URL lives on.
#[must_use]
pub fn site_origin(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}
