//! Guessed asset URLs: a pure rewrite of the thumbnail URL.

use serde::Deserialize;
use url::Url;

/// Extensions treated as image assets.
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Rules for deriving a full-size asset URL from a preview thumbnail.
///
/// The default matches the site's storage layout: previews live under
/// `c.<domain>/data/preview/..`, originals under `cs.<domain>/data/..`. The
/// original's extension is unknown without visiting the post, so the guess
/// assumes `jpg` unless `assumed_extension` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuessPolicy {
    /// Path segment identifying preview-sized assets.
    pub preview_segment: String,
    /// Replacement segment for full-size assets.
    pub full_segment: String,
    /// Host label prefix of the preview host.
    pub preview_host_prefix: String,
    /// Host label prefix of the sibling full-size host.
    pub full_host_prefix: String,
    /// Extension forced onto the guess; `None` keeps the thumbnail's.
    pub assumed_extension: Option<String>,
}

impl Default for GuessPolicy {
    fn default() -> Self {
        Self {
            preview_segment: "/preview/".to_string(),
            full_segment: "/".to_string(),
            preview_host_prefix: "c.".to_string(),
            full_host_prefix: "cs.".to_string(),
            assumed_extension: Some("jpg".to_string()),
        }
    }
}

impl GuessPolicy {
    /// Rewrites `thumbnail` into a full-size asset URL tagged with `post_id`.
    ///
    /// Returns `None` when the thumbnail is not a preview URL. Makes no
    /// network call: the result depends on the inputs only.
    #[must_use]
    pub fn guess_url(&self, thumbnail: &Url, post_id: &str) -> Option<String> {
        let path = thumbnail.path();
        if self.preview_segment.is_empty() || !path.contains(&self.preview_segment) {
            return None;
        }

        let mut full_path = path.replacen(&self.preview_segment, &self.full_segment, 1);
        if let Some(extension) = self.assumed_extension.as_deref().filter(|e| !e.is_empty()) {
            full_path = replace_extension(&full_path, extension);
        }

        let mut guessed = thumbnail.clone();
        guessed.set_path(&full_path);
        guessed.set_query(Some(post_id));
        guessed.set_fragment(None);

        if let Some(rest) = thumbnail
            .host_str()
            .and_then(|host| host.strip_prefix(self.preview_host_prefix.as_str()))
            .filter(|_| !self.preview_host_prefix.is_empty())
        {
            let full_host = format!("{}{rest}", self.full_host_prefix);
            guessed.set_host(Some(&full_host)).ok()?;
        }

        Some(guessed.to_string())
    }
}

/// Replaces the extension of the last path segment.
fn replace_extension(path: &str, extension: &str) -> String {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[segment_start..].rfind('.') {
        Some(dot) => format!("{}.{extension}", &path[..segment_start + dot]),
        None => format!("{path}.{extension}"),
    }
}

/// Returns true when the URL path ends in an image extension.
#[must_use]
pub fn is_image_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path();
    let last = path.rsplit('/').next().unwrap_or("");
    last.rsplit_once('.').is_some_and(|(_, ext)| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    })
}
