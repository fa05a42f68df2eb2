use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::analytics::Analytics;
use crate::config::{Config, CrawlConfig};
use crate::frontier::{Frontier, InitReport, NextUrl};
use crate::ledger::{Ledger, LedgerError, LedgerStats};
use crate::network::Fetcher;
use crate::policy::UrlPolicy;
use crate::report::ReportSink;
use crate::robots::RobotsCache;
use crate::scraper::Scraper;

/// Longest single sleep while waiting on the frontier, so a stop request is noticed promptly.
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// End-of-run figures.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub pages_processed: u64,
    pub accepted_pages: u64,
    pub duplicate_pages: u64,
    pub ledger: LedgerStats,
    pub duration_secs: u64,
    /// True when the run stopped on request rather than by exhausting the frontier.
    pub interrupted: bool,
}

impl std::fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pages processed ({} accepted, {} duplicates) in {}s | ledger: {} total, {} completed, {} pending",
            self.pages_processed,
            self.accepted_pages,
            self.duplicate_pages,
            self.duration_secs,
            self.ledger.total,
            self.ledger.completed,
            self.ledger.pending
        )
    }
}

/// Stops a running pool. Workers finish their current page first.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<Mutex<bool>>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        *self.running.lock() = false;
    }
}

/// Fixed set of workers sharing one frontier, scraper and fetcher.
#[derive(Clone)]
pub struct WorkerPool {
    frontier: Arc<Frontier>,
    scraper: Arc<Scraper>,
    fetcher: Arc<dyn Fetcher>,
    analytics: Arc<Analytics>,
    workers: usize,
    worker_delay: Duration,
    running: Arc<Mutex<bool>>,
    processed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(
        config: &CrawlConfig,
        frontier: Arc<Frontier>,
        scraper: Arc<Scraper>,
        fetcher: Arc<dyn Fetcher>,
        analytics: Arc<Analytics>,
    ) -> Self {
        Self {
            frontier,
            scraper,
            fetcher,
            analytics,
            workers: config.workers.max(1),
            worker_delay: config.worker_delay(),
            running: Arc::new(Mutex::new(true)),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wire every component from `config` and populate the frontier.
    ///
    /// Seed hosts get their robots.txt fetched before anything is queued.
    pub async fn build(
        config: &CrawlConfig,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<(Self, InitReport), CrawlError> {
        let ledger = Ledger::open(config.ledger_path(), config.restart)?;
        let resume = !config.restart;

        let robots = Arc::new(RobotsCache::new(Arc::clone(&fetcher), config.user_agent.clone()));
        robots.warm(config.seed_urls.iter().map(String::as_str)).await;

        let analytics = Arc::new(Analytics::new(sink, config.counted_subdomain_suffix.clone()));
        let policy = Arc::new(UrlPolicy::new(config, robots, Arc::clone(&analytics)));
        let frontier = Arc::new(Frontier::new(
            ledger,
            Arc::clone(&policy),
            config.host_delay(),
            config.max_crawl_delay(),
        ));

        let report = frontier.initialize(&config.seed_urls, resume).await?;
        info!(
            "Frontier ready: {} replayed, {} seeded | {}",
            report.replayed,
            report.seeded,
            frontier.stats()
        );

        let scraper = Arc::new(Scraper::new(config, policy, Arc::clone(&analytics)));
        Ok((Self::new(config, frontier, scraper, fetcher, analytics), report))
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn analytics(&self) -> &Arc<Analytics> {
        &self.analytics
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Run every worker until the frontier is exhausted or a stop is requested.
    ///
    /// A ledger failure in any worker stops the whole pool and is returned.
    pub async fn run(&self) -> Result<CrawlSummary, CrawlError> {
        let start = Instant::now();
        info!("Starting {} workers", self.workers);

        let mut tasks = JoinSet::new();
        for id in 0..self.workers {
            let worker = self.clone();
            tasks.spawn(async move { worker.worker_loop(id).await });
        }

        let mut first_error: Option<CrawlError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(CrawlError::Join(e)),
            };
            if let Err(e) = outcome {
                *self.running.lock() = false;
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let interrupted = !self.is_running();
        self.analytics.flush();

        let summary = CrawlSummary {
            pages_processed: self.processed.load(Ordering::Relaxed),
            accepted_pages: self.analytics.accepted_pages(),
            duplicate_pages: self.analytics.duplicate_pages(),
            ledger: self.frontier.ledger_stats()?,
            duration_secs: start.elapsed().as_secs(),
            interrupted,
        };
        info!("Crawl finished: {}", summary);
        Ok(summary)
    }

    /// pull, fetch, scrape, feed back, mark complete, pace
    async fn worker_loop(self, id: usize) -> Result<(), CrawlError> {
        debug!(worker = id, "worker started");

        while self.is_running() {
            let url = match self.frontier.next_url() {
                NextUrl::Ready(url) => url,
                NextUrl::Wait(d) => {
                    sleep(d.min(MAX_IDLE_SLEEP)).await;
                    continue;
                }
                NextUrl::Exhausted => break,
            };

            let response = match self.fetcher.fetch(&url).await {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(worker = id, "{} - {}", url, e);
                    None
                }
            };

            let children = self.scraper.process(&url, response.as_ref()).await;
            for child in &children {
                if let Err(e) = self.frontier.add_url(child).await {
                    return Err(self.fatal(id, &url, e));
                }
            }

            if let Err(e) = self.frontier.mark_complete(&url) {
                return Err(self.fatal(id, &url, e));
            }

            let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
            if processed % Config::PROGRESS_INTERVAL == 0 {
                info!(
                    "Progress: {} processed | {} accepted | {}",
                    processed,
                    self.analytics.accepted_pages(),
                    self.frontier.stats()
                );
            }

            if !self.worker_delay.is_zero() {
                sleep(self.worker_delay).await;
            }
        }

        debug!(worker = id, "worker exiting");
        Ok(())
    }

    fn fatal(&self, id: usize, url: &str, e: LedgerError) -> CrawlError {
        error!(worker = id, "Ledger write failed while processing {}: {}", url, e);
        *self.running.lock() = false;
        CrawlError::Ledger(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FetchError, FetchResponse};
    use crate::report::MemoryReportSink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use xxhash_rust::xxh3::xxh3_64;

    /// Every page links to two fresh pages, so the crawl never runs dry.
    struct EndlessSite;

    #[async_trait]
    impl Fetcher for EndlessSite {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            if url.ends_with("/robots.txt") {
                return Ok(FetchResponse {
                    status: 404,
                    final_url: url.to_string(),
                    ..Default::default()
                });
            }
            let seed = xxh3_64(url.as_bytes());
            let words: Vec<String> = (0..40u64)
                .map(|i| letters(seed.wrapping_add(i.wrapping_mul(0x9E37_79B9_7F4A_7C15))))
                .collect();
            let body = format!(
                "<p>{}</p><a href='/p{}'>a</a><a href='/q{}'>b</a>",
                words.join(" "),
                seed % 1_000_000,
                (seed >> 20) % 1_000_000
            );
            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "text/html".to_string());
            Ok(FetchResponse {
                status: 200,
                final_url: url.to_string(),
                body: body.into_bytes(),
                headers,
            })
        }
    }

    fn letters(mut v: u64) -> String {
        let mut word = String::new();
        for _ in 0..8 {
            word.push((b'a' + (v % 26) as u8) as char);
            v /= 26;
        }
        word
    }

    /// Refuses every connection.
    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse, FetchError> {
            Err(FetchError::ConnectionRefused)
        }
    }

    fn test_config(dir: &TempDir) -> CrawlConfig {
        CrawlConfig {
            seed_urls: vec!["https://www.ics.uci.edu/".to_string()],
            data_dir: dir.path().to_path_buf(),
            worker_delay_ms: 0,
            host_delay_ms: 0,
            min_tokens: 1,
            workers: 2,
            restart: true,
            ..CrawlConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_failures_still_complete() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.allow_unknown_robots = true;

        let (pool, report) = WorkerPool::build(&config, Arc::new(Offline), Arc::new(MemoryReportSink::new()))
            .await
            .unwrap();
        assert_eq!(report.seeded, 1);

        let summary = pool.run().await.unwrap();
        assert_eq!(summary.pages_processed, 1);
        assert_eq!(summary.ledger.completed, 1);
        assert_eq!(summary.ledger.pending, 0);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn test_stop_leaves_pending_work() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.worker_delay_ms = 20;

        let (pool, _) = WorkerPool::build(&config, Arc::new(EndlessSite), Arc::new(MemoryReportSink::new()))
            .await
            .unwrap();
        let handle = pool.shutdown_handle();

        let runner = pool.clone();
        let task = tokio::spawn(async move { runner.run().await });
        sleep(Duration::from_millis(200)).await;
        handle.stop();

        let summary = task.await.unwrap().unwrap();
        assert!(summary.interrupted);
        assert!(summary.pages_processed > 0);
        assert!(summary.ledger.pending > 0);
    }
}
