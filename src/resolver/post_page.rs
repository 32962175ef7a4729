//! Authoritative asset link extraction from a post detail page.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use crate::listing::compile_static_selector;

static IMAGE_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("div#post-content a#image-link"));

static IMAGE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("#image"));

/// Builds the post detail page URL for `post_id` on `origin`.
#[must_use]
pub fn post_page_url(origin: &Url, post_id: &str) -> Option<Url> {
    origin.join(&format!("/post/show/{post_id}")).ok()
}

/// Returns the raw asset reference from a post page.
///
/// The image link anchor's `href` wins; the image element's `src` is the
/// fallback. Empty values count as absent.
#[must_use]
pub fn extract_asset_reference(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let first_attr = |selector: &Selector, attr: &str| {
        document
            .select(selector)
            .next()
            .and_then(|element| element.value().attr(attr))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    first_attr(&IMAGE_LINK_SELECTOR, "href").or_else(|| first_attr(&IMAGE_SELECTOR, "src"))
}

/// Turns an asset reference into an absolute URL.
///
/// Scheme-relative references take the scheme of `page_url`; relative
/// references are joined onto it.
#[must_use]
pub fn absolutize_reference(reference: &str, page_url: &Url) -> Option<String> {
    if reference.starts_with("//") {
        return Some(format!("{}:{reference}", page_url.scheme()));
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Some(reference.to_string());
    }
    page_url.join(reference).ok().map(|url| url.to_string())
}
