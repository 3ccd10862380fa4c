//! Cache key canonicalization.
//!
//! Deliberately minimal: no case folding beyond what URL parsing does, no
//! default-port stripping and no trailing-slash deduplication. Two strings
//! that differ in any of those respects are different cache keys.

use serde::{Deserialize, Serialize};
use url::Url;

/// Whether keys collapse to `scheme://host/` or keep the full URL.
/// Domain-only unless the user turned it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationPolicy {
    pub domain_only: bool,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self { domain_only: true }
    }
}

/// Reduce a URL to `scheme://host/`. Returns `None` when the input does not
/// parse or has no host.
pub fn to_domain_form(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(format!("{}://{}/", url.scheme(), host))
}

/// Drop the fragment. Input that does not parse is returned as-is.
pub fn strip_fragment(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Compose the two steps under `policy`. `None` means the URL cannot be
/// checked at all.
pub fn cache_key(raw: &str, policy: NormalizationPolicy) -> Option<String> {
    if policy.domain_only {
        to_domain_form(raw).map(|domain| strip_fragment(&domain))
    } else {
        Url::parse(raw).ok()?;
        Some(strip_fragment(raw))
    }
}

/// Only http and https pages are looked up.
pub fn is_web_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Hostname exactly as the URL parser reports it (IDN labels stay in their
/// ASCII form).
pub fn hostname(raw: &str) -> Option<String> {
    Url::parse(raw).ok()?.host_str().map(|h| h.to_string())
}
