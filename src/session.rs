use crate::normalizer::strip_fragment;
use url::Url;

/// Per-tab state kept across navigations.
///
/// Challenge interstitials (Cloudflare's "checking your browser" pages) sit
/// on a different URL than the page the user asked for. The first real page
/// seen in the session is remembered so checks run against it instead.
#[derive(Debug, Clone, Default)]
pub struct PageSession {
    original_url: Option<String>,
}

impl PageSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn original_url(&self) -> Option<&str> {
        self.original_url.as_deref()
    }

    /// Record `location` as the session's original URL unless one is already
    /// known or this is a challenge page.
    pub fn on_page_load(&mut self, location: &str) {
        if self.original_url.is_none() && !is_challenge_page(location) {
            log::debug!("Recording original URL for session: {location}");
            self.original_url = Some(location.to_string());
        }
    }

    /// URL to check for the page at `location`. On a challenge page this is
    /// the remembered original, if any; otherwise `location` without its
    /// fragment.
    pub fn effective_url(&self, location: &str) -> Option<String> {
        if is_challenge_page(location) {
            return self.original_url.clone();
        }
        Some(strip_fragment(location))
    }
}

/// Run `location` through a fresh session that first saw `original`, if
/// given. `None` when `location` is a challenge page with nothing behind it.
pub fn resolve_location(original: Option<&str>, location: &str) -> Option<String> {
    let mut session = PageSession::new();
    if let Some(original) = original {
        session.on_page_load(original);
    }
    session.on_page_load(location);
    session.effective_url(location)
}

pub fn is_challenge_page(location: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => {
            url.host_str().is_some_and(|h| h.contains("cloudflare"))
                || url.path().contains("/cdn-cgi/")
        }
        Err(_) => false,
    }
}

/// Things that start work in the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Keyboard shortcut or the "run check" action.
    Check { url: String },
    /// Page finished loading; runs the confusable scan.
    PageLoad { url: String },
    Submit { url: String, comment: String },
}

/// A key event as seen by the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPress {
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    /// Physical key code, e.g. `KeyC`.
    pub code: String,
    /// Focus is in an input, textarea or contenteditable element.
    pub in_editable: bool,
}

impl KeyPress {
    /// Alt+C, without Ctrl or Shift, outside editable fields.
    pub fn triggers_check(&self) -> bool {
        self.alt && !self.ctrl && !self.shift && self.code == "KeyC" && !self.in_editable
    }
}
