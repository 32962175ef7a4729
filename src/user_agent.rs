//! Shared User-Agent strings for page and asset HTTP clients.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/sankaku-ripper";

/// User-Agent for listing and post page fetches.
#[must_use]
pub(crate) fn default_page_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sankaku-ripper/{version} (+{PROJECT_UA_URL})")
}

/// User-Agent for asset downloads.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sankaku-ripper/{version} (asset-download; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_format_consistency() {
        let page_ua = default_page_user_agent();
        let download_ua = default_download_user_agent();
        for ua in [&page_ua, &download_ua] {
            assert!(ua.contains(PROJECT_UA_URL));
            assert!(ua.contains(env!("CARGO_PKG_VERSION")));
            assert!(ua.starts_with("sankaku-ripper/"));
        }
        assert_ne!(page_ua, download_ua);
    }
}
