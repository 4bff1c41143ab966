//! URL handling for News-Harvest
//!
//! Requests are routed, gated and robots-checked by pieces of their URL:
//! the hostname keys the domain gate and the stream partition, while the
//! origin (scheme + host + port) keys the robots.txt cache.

use crate::{UrlError, UrlResult};
use url::Url;

/// Parses a URL and requires it to be an absolute http(s) URL with a host
///
/// # Examples
///
/// ```
/// use news_harvest::url::parse_absolute;
///
/// assert!(parse_absolute("https://example.com/a").is_ok());
/// assert!(parse_absolute("/relative/path").is_err());
/// assert!(parse_absolute("mailto:someone@example.com").is_err());
/// ```
pub fn parse_absolute(url_str: &str) -> UrlResult<Url> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    ensure_fetchable(&url)?;
    Ok(url)
}

/// Checks that an already-parsed URL is something the fetcher can download
pub fn ensure_fetchable(url: &Url) -> UrlResult<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(UrlError::MissingDomain),
    }
}

/// Extracts the lowercase hostname used as domain gate and partition key
///
/// Unlike the origin, the key ignores scheme and port, so
/// `http://example.com` and `https://example.com:8443` share a gate.
pub fn domain_key(url: &Url) -> UrlResult<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)
}

/// Returns the `scheme://host[:port]` origin of a URL
///
/// Default ports are omitted, matching how browsers serialize origins.
pub fn origin_of(url: &Url) -> UrlResult<String> {
    ensure_fetchable(url)?;
    Ok(url.origin().ascii_serialization())
}
