//! Per-page pipeline: response checks, text extraction, analytics update
//! and link extraction.

use lazy_static::lazy_static;
use regex::Regex;
use ::scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::analytics::{count_words, Analytics, IngestOutcome, PageStats};
use crate::config::CrawlConfig;
use crate::fingerprint::Fingerprint;
use crate::network::FetchResponse;
use crate::policy::{PolicyRejection, UrlPolicy};
use crate::url_utils::{is_html_content_type, normalize_url, resolve_link};

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[A-Za-z]+(?:['-][A-Za-z]+)*").expect("token pattern is valid");
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("anchor selector is valid");
    static ref BASE: Selector = Selector::parse("base[href]").expect("base selector is valid");
}

/// Elements whose text is never shown to a reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Why a fetched page produced no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRejection {
    NoResponse,
    BadStatus(u16),
    PolicyRejected(PolicyRejection),
    Oversized(usize),
    TokenCount(usize),
    Duplicate,
    Unreadable(String),
}

impl std::fmt::Display for PageRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no response"),
            Self::BadStatus(status) => write!(f, "status {}", status),
            Self::PolicyRejected(reason) => write!(f, "final url rejected: {}", reason),
            Self::Oversized(len) => write!(f, "body of {} bytes is too large", len),
            Self::TokenCount(n) => write!(f, "{} tokens is outside the accepted range", n),
            Self::Duplicate => write!(f, "near-duplicate content"),
            Self::Unreadable(why) => write!(f, "unreadable: {}", why),
        }
    }
}

/// Lower-cased alphabetic runs longer than one character. Apostrophes and
/// hyphens between letters stay inside the token.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.len() > 1)
        .collect()
}

/// Text of every node outside script-like elements, space separated.
pub fn visible_text(document: &Html) -> String {
    let mut text = String::new();
    for node in document.root_element().descendants() {
        let Some(chunk) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }
    text
}

/// Anchor targets resolved against `<base href>` (or the page URL), fragments removed.
pub fn extract_links(document: &Html, page_url: &Url) -> Vec<String> {
    let base = document
        .select(&BASE)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut seen = HashSet::new();
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_link(&base, href))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

struct ExtractedPage {
    tokens: Vec<String>,
    links: Vec<String>,
}

pub struct Scraper {
    policy: Arc<UrlPolicy>,
    analytics: Arc<Analytics>,
    min_tokens: usize,
    max_tokens: usize,
    max_body_bytes: usize,
}

impl std::fmt::Debug for Scraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scraper")
            .field("min_tokens", &self.min_tokens)
            .field("max_tokens", &self.max_tokens)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl Scraper {
    pub fn new(config: &CrawlConfig, policy: Arc<UrlPolicy>, analytics: Arc<Analytics>) -> Self {
        Self {
            policy,
            analytics,
            min_tokens: config.min_tokens,
            max_tokens: config.max_tokens,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Candidate child URLs of a fetched page; empty for any rejected page.
    pub async fn process(&self, url: &str, response: Option<&FetchResponse>) -> Vec<String> {
        match self.try_process(url, response).await {
            Ok(links) => {
                debug!("{} yielded {} links", url, links.len());
                links
            }
            Err(PageRejection::Unreadable(why)) => {
                warn!("Could not extract {}: {}", url, why);
                Vec::new()
            }
            Err(rejection) => {
                debug!("Dropped {}: {}", url, rejection);
                Vec::new()
            }
        }
    }

    pub async fn try_process(&self, url: &str, response: Option<&FetchResponse>) -> Result<Vec<String>, PageRejection> {
        let response = response.ok_or(PageRejection::NoResponse)?;
        if !response.is_success() {
            return Err(PageRejection::BadStatus(response.status));
        }

        let final_url = if response.final_url.is_empty() {
            url
        } else {
            response.final_url.as_str()
        };
        let page_url = self
            .policy
            .check(final_url)
            .await
            .map_err(PageRejection::PolicyRejected)?;

        if let Some(normalized) = normalize_url(page_url.as_str()) {
            self.analytics.mark_visited(&normalized);
        }

        if response.body.len() > self.max_body_bytes {
            return Err(PageRejection::Oversized(response.body.len()));
        }
        if let Some(content_type) = response.header("content-type") {
            if !is_html_content_type(content_type) {
                return Err(PageRejection::Unreadable(format!("content-type {}", content_type)));
            }
        }

        let page = Self::extract(&page_url, &response.body);
        let token_count = page.tokens.len();
        if token_count < self.min_tokens || token_count > self.max_tokens {
            return Err(PageRejection::TokenCount(token_count));
        }

        let word_counts = count_words(page.tokens.iter().map(String::as_str));
        let fingerprint = Fingerprint::from_word_counts(&word_counts);
        let outcome = self.analytics.ingest_page(PageStats {
            url: page_url.to_string(),
            token_count,
            word_counts,
            fingerprint,
        });

        match outcome {
            IngestOutcome::Duplicate => Err(PageRejection::Duplicate),
            IngestOutcome::Accepted => Ok(page.links),
        }
    }

    // Html is not Send; it stays inside this synchronous call.
    fn extract(page_url: &Url, body: &[u8]) -> ExtractedPage {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);
        ExtractedPage {
            tokens: tokenize(&visible_text(&document)),
            links: extract_links(&document, page_url),
        }
    }
}
