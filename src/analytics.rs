//! Corpus-wide analytics: word frequencies, longest page, per-subdomain
//! page counts, the visited set and the fingerprint set.
//!
//! All of it sits behind one lock. A page's merge, duplicate check,
//! fingerprint insert and subdomain bump happen in a single critical
//! section, so two near-identical pages processed concurrently cannot both
//! pass the duplicate check.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::fingerprint::{Fingerprint, FingerprintSet};
use crate::report::ReportSink;
use crate::url_utils::{is_proper_subdomain, strip_www};

lazy_static! {
    /// English stopwords excluded from word counts and fingerprints
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
        "are", "aren't", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can't", "cannot", "could", "couldn't", "did",
        "didn't", "do", "does", "doesn't", "doing", "don't", "down", "during", "each", "few",
        "for", "from", "further", "had", "hadn't", "has", "hasn't", "have", "haven't",
        "having", "he", "he'd", "he'll", "he's", "her", "here", "here's", "hers", "herself",
        "him", "himself", "his", "how", "how's", "i", "i'd", "i'll", "i'm", "i've", "if",
        "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's", "me", "more",
        "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off", "on", "once",
        "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own",
        "same", "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so",
        "some", "such", "than", "that", "that's", "the", "their", "theirs", "them",
        "themselves", "then", "there", "there's", "these", "they", "they'd", "they'll",
        "they're", "they've", "this", "those", "through", "to", "too", "under", "until", "up",
        "very", "was", "wasn't", "we", "we'd", "we'll", "we're", "we've", "were", "weren't",
        "what", "what's", "when", "when's", "where", "where's", "which", "while", "who",
        "who's", "whom", "why", "why's", "with", "won't", "would", "wouldn't", "you",
        "you'd", "you'll", "you're", "you've", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect();
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Stopword-filtered word-count vector of one page.
pub fn count_words<'a, I: IntoIterator<Item = &'a str>>(tokens: I) -> HashMap<String, u64> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for token in tokens {
        if !is_stopword(token) {
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongestPage {
    pub url: String,
    pub words: usize,
}

/// Point-in-time view handed to the report sink.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub unique_page_count: u64,
    pub longest_page: Option<LongestPage>,
    /// Ordered by descending count, then word.
    pub top_words: Vec<(String, u64)>,
    pub subdomain_suffix: String,
    /// `scheme://host` keys, sorted.
    pub subdomains: Vec<(String, u64)>,
    pub generated_at: DateTime<Utc>,
}

/// Everything the aggregator needs to know about an extracted page.
#[derive(Debug, Clone)]
pub struct PageStats {
    pub url: String,
    /// All tokens, stopwords included.
    pub token_count: usize,
    pub word_counts: HashMap<String, u64>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Duplicate,
}

#[derive(Debug, Default)]
struct AnalyticsState {
    word_freq: HashMap<String, u64>,
    longest_page: Option<LongestPage>,
    subdomains: BTreeMap<String, u64>,
    visited: HashSet<String>,
    fingerprints: FingerprintSet,
    accepted_pages: u64,
    duplicate_pages: u64,
}

pub struct Analytics {
    state: Mutex<AnalyticsState>,
    sink: Arc<dyn ReportSink>,
    /// Generation of the last snapshot handed to the sink. Held while
    /// emitting so reports are written one at a time, newest last.
    emitted: Mutex<u64>,
    counted_suffix: String,
    top_words: usize,
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("counted_suffix", &self.counted_suffix)
            .field("top_words", &self.top_words)
            .finish()
    }
}

impl Analytics {
    pub fn new(sink: Arc<dyn ReportSink>, counted_suffix: impl Into<String>) -> Self {
        Self::with_threshold(sink, counted_suffix, Config::SIMILARITY_THRESHOLD)
    }

    pub fn with_threshold(sink: Arc<dyn ReportSink>, counted_suffix: impl Into<String>, threshold: f64) -> Self {
        Self {
            state: Mutex::new(AnalyticsState {
                fingerprints: FingerprintSet::new(threshold),
                ..Default::default()
            }),
            sink,
            emitted: Mutex::new(0),
            counted_suffix: counted_suffix.into().to_ascii_lowercase(),
            top_words: Config::REPORT_TOP_WORDS,
        }
    }

    pub fn is_visited(&self, normalized_url: &str) -> bool {
        self.state.lock().visited.contains(normalized_url)
    }

    /// Returns false if the URL was already visited.
    pub fn mark_visited(&self, normalized_url: &str) -> bool {
        self.state.lock().visited.insert(normalized_url.to_string())
    }

    /// Fold one extracted page into the corpus.
    ///
    /// Word frequencies and the longest-page record are updated for every
    /// page. Only a page whose fingerprint is distinct from everything seen
    /// so far gets its fingerprint stored, its subdomain counted and a
    /// snapshot emitted. The sink runs after the analytics lock is released.
    pub fn ingest_page(&self, page: PageStats) -> IngestOutcome {
        let mut state = self.state.lock();

        for (word, count) in &page.word_counts {
            *state.word_freq.entry(word.clone()).or_insert(0) += count;
        }

        let is_longer = state
            .longest_page
            .as_ref()
            .map_or(true, |longest| page.token_count > longest.words);
        if is_longer {
            state.longest_page = Some(LongestPage {
                url: page.url.clone(),
                words: page.token_count,
            });
        }

        if !state.fingerprints.insert_if_distinct(page.fingerprint) {
            state.duplicate_pages += 1;
            debug!("Near-duplicate content at {} ({})", page.url, page.fingerprint);
            return IngestOutcome::Duplicate;
        }
        state.accepted_pages += 1;

        if let Some(key) = self.subdomain_key(&page.url) {
            *state.subdomains.entry(key).or_insert(0) += 1;
        }

        let generation = state.accepted_pages;
        let snapshot = self.build_snapshot(&state);
        drop(state);

        self.emit(generation, &snapshot, false);
        IngestOutcome::Accepted
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let state = self.state.lock();
        self.build_snapshot(&state)
    }

    /// Emit the current snapshot regardless of page activity.
    pub fn flush(&self) {
        let (generation, snapshot) = {
            let state = self.state.lock();
            (state.accepted_pages, self.build_snapshot(&state))
        };
        self.emit(generation, &snapshot, true);
    }

    /// Hand a snapshot to the sink unless a newer one was already written.
    fn emit(&self, generation: u64, snapshot: &AnalyticsSnapshot, force: bool) {
        let mut emitted = self.emitted.lock();
        if generation < *emitted || (generation == *emitted && !force) {
            debug!("Skipping stale report generation {}", generation);
            return;
        }
        if let Err(e) = self.sink.emit(snapshot) {
            warn!("Failed to write analytics report: {}", e);
        }
        *emitted = generation;
    }

    pub fn word_frequency(&self, word: &str) -> u64 {
        self.state.lock().word_freq.get(word).copied().unwrap_or(0)
    }

    pub fn accepted_pages(&self) -> u64 {
        self.state.lock().accepted_pages
    }

    pub fn duplicate_pages(&self) -> u64 {
        self.state.lock().duplicate_pages
    }

    pub fn visited_count(&self) -> usize {
        self.state.lock().visited.len()
    }

    /// `scheme://host` for hosts that are proper subdomains of the counted suffix.
    fn subdomain_key(&self, url: &str) -> Option<String> {
        if self.counted_suffix.is_empty() {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let host = strip_www(parsed.host_str()?);
        if is_proper_subdomain(host, &self.counted_suffix) {
            Some(format!("{}://{}", parsed.scheme(), host))
        } else {
            None
        }
    }

    fn build_snapshot(&self, state: &AnalyticsState) -> AnalyticsSnapshot {
        let mut words: Vec<(&String, &u64)> = state.word_freq.iter().collect();
        words.sort_unstable_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        AnalyticsSnapshot {
            unique_page_count: state.visited.len() as u64,
            longest_page: state.longest_page.clone(),
            top_words: words
                .into_iter()
                .take(self.top_words)
                .map(|(w, c)| (w.clone(), *c))
                .collect(),
            subdomain_suffix: self.counted_suffix.clone(),
            subdomains: state.subdomains.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            generated_at: Utc::now(),
        }
    }
}
