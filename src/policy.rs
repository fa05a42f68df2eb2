//! URL admission policy
//!
//! Checks run in a fixed order and the first failure wins. Only the robots
//! check has a side effect: it may fetch and cache robots.txt for an
//! in-scope host seen for the first time.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::analytics::Analytics;
use crate::config::CrawlConfig;
use crate::robots::{RobotsCache, RobotsVerdict};
use crate::url_utils::{host_matches_domain, normalize_url};

lazy_static! {
    /// Extensions of binary or otherwise non-text resources
    static ref BLOCKED_EXTENSION: Regex = Regex::new(concat!(
        r"\.(css|js|bmp|gif|jpe?g|ico",
        r"|png|tiff?|mid|mp2|mp3|mp4",
        r"|wav|avi|mov|mpeg|ram|m4v|mkv|ogg|ogv|pdf",
        r"|ps|eps|tex|ppt|pptx|doc|docx|xls|xlsx|names",
        r"|data|dat|exe|bz2|tar|msi|bin|7z|psd|dmg|iso",
        r"|epub|dll|cnf|tgz|sha1",
        r"|thmx|mso|arff|rtf|jar|csv",
        r"|rm|smil|wmv|swf|wma|zip|rar|gz)$"
    ))
    .expect("extension pattern is valid");
}

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    Malformed,
    BannedDomain,
    NonAscii,
    RobotsDisallowed,
    RobotsUnknown,
    BlockedExtension,
    OutOfScope,
    Trap,
    Visited,
}

impl std::fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Malformed => "malformed",
            Self::BannedDomain => "banned domain",
            Self::NonAscii => "non-ascii",
            Self::RobotsDisallowed => "disallowed by robots.txt",
            Self::RobotsUnknown => "robots.txt unknown",
            Self::BlockedExtension => "blocked extension",
            Self::OutOfScope => "out of scope",
            Self::Trap => "repeated path segment",
            Self::Visited => "already visited",
        };
        f.write_str(reason)
    }
}

impl PolicyRejection {
    /// True when the URL text alone decides the rejection, so no later
    /// configuration or robots.txt change can admit it.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Malformed | Self::NonAscii | Self::BlockedExtension | Self::Trap
        )
    }
}

pub struct UrlPolicy {
    allowed_domains: Vec<String>,
    banned_domains: Vec<String>,
    allow_unknown_robots: bool,
    robots: Arc<RobotsCache>,
    analytics: Arc<Analytics>,
}

impl std::fmt::Debug for UrlPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlPolicy")
            .field("allowed_domains", &self.allowed_domains)
            .field("banned_domains", &self.banned_domains)
            .field("allow_unknown_robots", &self.allow_unknown_robots)
            .finish()
    }
}

impl UrlPolicy {
    pub fn new(config: &CrawlConfig, robots: Arc<RobotsCache>, analytics: Arc<Analytics>) -> Self {
        let lower = |domains: &[String]| -> Vec<String> {
            domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect()
        };

        Self {
            allowed_domains: lower(&config.allowed_domains),
            banned_domains: lower(&config.banned_domains),
            allow_unknown_robots: config.allow_unknown_robots,
            robots,
            analytics,
        }
    }

    pub fn robots(&self) -> &Arc<RobotsCache> {
        &self.robots
    }

    pub fn in_scope(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|d| host_matches_domain(host, d))
    }

    pub async fn is_valid(&self, raw: &str) -> bool {
        self.check(raw).await.is_ok()
    }

    /// Run every check in order and return the parsed URL on success.
    pub async fn check(&self, raw: &str) -> Result<Url, PolicyRejection> {
        let url = Url::parse(raw.trim()).map_err(|_| PolicyRejection::Malformed)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PolicyRejection::Malformed);
        }
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
            _ => return Err(PolicyRejection::Malformed),
        };

        if self.banned_domains.iter().any(|d| host_matches_domain(&host, d)) {
            return Err(PolicyRejection::BannedDomain);
        }

        if !raw.is_ascii() {
            return Err(PolicyRejection::NonAscii);
        }

        let in_scope = self.in_scope(&host);
        match self.robots.verdict(&url, in_scope).await {
            RobotsVerdict::Allowed => {}
            RobotsVerdict::Disallowed => return Err(PolicyRejection::RobotsDisallowed),
            RobotsVerdict::Unknown if self.allow_unknown_robots => {}
            RobotsVerdict::Unknown => return Err(PolicyRejection::RobotsUnknown),
        }

        let path = url.path().to_ascii_lowercase();
        if BLOCKED_EXTENSION.is_match(&path) {
            return Err(PolicyRejection::BlockedExtension);
        }

        if !in_scope {
            return Err(PolicyRejection::OutOfScope);
        }

        if has_repeated_directory(&path) {
            return Err(PolicyRejection::Trap);
        }

        let normalized = normalize_url(url.as_str()).ok_or(PolicyRejection::Malformed)?;
        if self.analytics.is_visited(&normalized) {
            return Err(PolicyRejection::Visited);
        }

        Ok(url)
    }
}

/// True when any directory segment of `path` occurs more than once.
///
/// Only the current path is inspected; cycles spread across different URLs
/// are not detected.
pub fn has_repeated_directory(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 3 {
        return false;
    }
    // the last element is the file name (possibly empty)
    let directories = &segments[..segments.len() - 1];
    let mut seen = HashSet::new();
    directories
        .iter()
        .filter(|s| !s.is_empty())
        .any(|s| !seen.insert(*s))
}
