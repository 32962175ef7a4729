//! One fetched page of a tag listing.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

/// Attribute on the pagination control holding the next page link.
const NEXT_PAGE_ATTR: &str = "next-page-url";

pub(crate) fn compile_static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e:?}"))
}

static PAGINATION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.pagination"));

/// A listing page and its pagination pointer.
///
/// Immutable once built. The HTML is kept as source text; parsed documents
/// are not `Send` and never live across an await point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    source_url: Url,
    html: String,
    next_page_url: Option<Url>,
}

impl ListingPage {
    /// Builds a page from its final URL and body, resolving the next page link.
    #[must_use]
    pub fn parse(source_url: Url, html: String) -> Self {
        let next_page_url = find_next_page_url(&html, &source_url);
        debug!(
            url = %source_url,
            next = next_page_url.as_ref().map(Url::as_str),
            "listing page parsed"
        );
        Self {
            source_url,
            html,
            next_page_url,
        }
    }

    /// URL the page was fetched from (after redirects).
    #[must_use]
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Raw HTML of the page.
    #[must_use]
    pub fn html(&self) -> &str {
        &self.html
    }

    /// Absolute URL of the next page, or `None` on the last page.
    #[must_use]
    pub fn next_page_url(&self) -> Option<&Url> {
        self.next_page_url.as_ref()
    }
}

/// Reads the first pagination control's `next-page-url`, made absolute
/// against the page URL.
fn find_next_page_url(html: &str, page_url: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let pagination = document.select(&PAGINATION_SELECTOR).next()?;
    let raw = pagination.value().attr(NEXT_PAGE_ATTR)?.trim();
    if raw.is_empty() {
        return None;
    }
    match page_url.join(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(url = %page_url, next = raw, error = %e, "unusable next page link");
            None
        }
    }
}
