//! URL utilities for consistent crawling behavior across modules.

use url::Url;
use xxhash_rust::xxh3::xxh3_128;

/// Schemes that never lead to a crawlable document.
const SKIPPED_LINK_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "file:"];

/// Canonical form used for ledger keys and dedup.
///
/// Scheme and host are lower-cased by the parser, default ports dropped,
/// the fragment removed and a trailing slash trimmed from non-root paths.
/// Path and query keep their case.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
        if parsed.path().is_empty() {
            parsed.set_path("/");
        }
    }

    Some(parsed.to_string())
}

/// 128-bit identifier of a normalized URL.
pub fn url_hash(normalized: &str) -> u128 {
    xxh3_128(normalized.as_bytes())
}

pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
}

pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// True when `host` is `domain` or a dotted subdomain of it.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// True when `host` is a proper subdomain of `suffix` (not `suffix` itself).
pub fn is_proper_subdomain(host: &str, suffix: &str) -> bool {
    host != suffix && host_matches_domain(host, suffix)
}

/// Resolve an anchor target against the page base, dropping the fragment.
///
/// Covers absolute, root-relative (`/x`), protocol-relative (`//h/x`),
/// parent-relative (`../x`) and plain relative forms.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if SKIPPED_LINK_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

/// robots.txt location for the scheme and host of `url`.
pub fn robots_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}/robots.txt", url.scheme(), host, port)),
        None => Some(format!("{}://{}/robots.txt", url.scheme(), host)),
    }
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/html") || lower.starts_with("application/xhtml+xml")
}
