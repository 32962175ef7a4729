//! Crawl session cookie jar.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Cookies shared by every request of one crawl.
///
/// The jar is filled once, from the response to the first listing page, and
/// sealed afterwards. All later fetches only read it. Not persisted across
/// runs.
#[derive(Debug, Default)]
pub struct Session {
    cookies: RwLock<BTreeMap<String, String>>,
    sealed: AtomicBool,
}

impl Session {
    /// Creates an empty, unsealed session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges server-set cookies and seals the jar.
    ///
    /// Returns `false` without touching the jar when it was already sealed.
    pub fn merge_and_seal<I, K, V>(&self, cookies: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.sealed.swap(true, Ordering::SeqCst) {
            debug!("session already sealed; ignoring cookies");
            return false;
        }
        if let Ok(mut jar) = self.cookies.write() {
            for (name, value) in cookies {
                jar.insert(name.into(), value.into());
            }
            debug!(cookies = jar.len(), "session cookies merged");
        }
        true
    }

    /// Returns whether the jar has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Returns a cookie value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies
            .read()
            .ok()
            .and_then(|jar| jar.get(name).cloned())
    }

    /// Number of cookies held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.read().map_or(0, |jar| jar.len())
    }

    /// Returns true when no cookies are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the jar as a `Cookie` request header value.
    ///
    /// Returns `None` when the jar is empty.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let jar = self.cookies.read().ok()?;
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
