//! Listing entry extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::ListingPage;
use super::page::compile_static_selector;

/// Prefix of a thumbnail element's id in front of the numeric post id.
const POST_ID_PREFIX: &str = "p";

static THUMB_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div.content > div > span.thumb"));

static THUMB_IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("img[src]"));

/// One thumbnail on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Post identifier, unique within an album.
    pub post_id: String,
    /// Absolute preview image URL, when the thumbnail carried one.
    pub thumbnail_url: Option<Url>,
}

/// Single-pass iterator over a page's entries in document order.
#[derive(Debug)]
pub struct Entries {
    inner: std::vec::IntoIter<ListingEntry>,
}

impl Iterator for Entries {
    type Item = ListingEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries {}

/// Extracts the listing entries of a page, in page-rendering order.
///
/// An empty page yields an empty sequence. Thumbnails without a usable id are
/// skipped with a warning.
#[must_use]
pub fn extract_entries(page: &ListingPage) -> Entries {
    let document = Html::parse_document(page.html());
    let entries: Vec<ListingEntry> = document
        .select(&THUMB_SELECTOR)
        .filter_map(|thumb| entry_from_thumb(thumb, page.source_url()))
        .collect();
    debug!(url = %page.source_url(), entries = entries.len(), "listing entries extracted");
    Entries {
        inner: entries.into_iter(),
    }
}

fn entry_from_thumb(thumb: ElementRef<'_>, page_url: &Url) -> Option<ListingEntry> {
    let raw_id = thumb.value().id().unwrap_or("").trim();
    let post_id = raw_id.strip_prefix(POST_ID_PREFIX).unwrap_or(raw_id);
    if post_id.is_empty() {
        warn!(url = %page_url, id = raw_id, "thumbnail without post id; skipping");
        return None;
    }

    let thumbnail_url = thumb
        .select(&THUMB_IMAGE_SELECTOR)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .and_then(|src| page_url.join(src).ok());

    Some(ListingEntry {
        post_id: post_id.to_string(),
        thumbnail_url,
    })
}
