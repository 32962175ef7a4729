//! File naming for downloaded assets.
//!
//! Every asset lands as `{postId}_{name}` where `name` is the last URL path
//! segment, so a file on disk can always be traced back to its post.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

/// Builds the on-disk name for an asset: prefix plus the decoded last path segment.
///
/// The query string is ignored; guessed URLs carry the post id there and it
/// is already in the prefix.
#[must_use]
pub(crate) fn asset_filename(url: &Url, prefix: &str) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty())
        .map(|last| {
            urlencoding::decode(last).map_or_else(
                |e| {
                    debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
                    last.to_string()
                },
                std::borrow::Cow::into_owned,
            )
        })
        .unwrap_or_else(|| "asset.bin".to_string());
    sanitize_filename(&format!("{prefix}{segment}"))
}

/// Sanitizes a filename by replacing characters that are invalid on common
/// filesystems (`/ \ : * ? " < > |` and control characters).
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a path in `dir` that does not exist yet.
///
/// `file.jpg`, then `file_2.jpg`, `file_3.jpg`, ...
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let base_path = dir.join(filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };

    for i in 2..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
