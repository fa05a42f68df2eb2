use async_trait::async_trait;
use corpus_crawler::config::{CrawlConfig, ReportFormat};
use corpus_crawler::fingerprint::Fingerprint;
use corpus_crawler::frontier::NextUrl;
use corpus_crawler::ledger::Ledger;
use corpus_crawler::network::{FetchError, FetchResponse, Fetcher};
use corpus_crawler::report::{FileReportSink, MemoryReportSink};
use corpus_crawler::url_utils::{normalize_url, url_hash};
use corpus_crawler::worker::WorkerPool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// In-memory site: pages by exact URL, robots.txt by host, everything else 404.
#[derive(Default)]
struct StubSite {
    pages: HashMap<String, String>,
    robots: HashMap<String, String>,
    log: Mutex<Vec<String>>,
    /// Delay before each page response.
    latency: Duration,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl StubSite {
    fn page(mut self, url: &str, body: String) -> Self {
        self.pages.insert(url.to_string(), body);
        self
    }

    fn robots(mut self, host: &str, body: &str) -> Self {
        self.robots.insert(host.to_string(), body.to_string());
        self
    }

    fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Page fetches in order, robots.txt requests excluded.
    fn fetched(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|u| !u.ends_with("/robots.txt"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Fetcher for StubSite {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.log.lock().push(url.to_string());

        let (status, body, content_type) = if url.ends_with("/robots.txt") {
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();
            match self.robots.get(&host) {
                Some(body) => (200, body.clone(), "text/plain"),
                None => (404, String::new(), "text/plain"),
            }
        } else {
            if !self.latency.is_zero() {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            match self.pages.get(url) {
                Some(body) => (200, body.clone(), "text/html; charset=utf-8"),
                None => (404, String::new(), "text/html"),
            }
        };

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Ok(FetchResponse {
            status,
            final_url: url.to_string(),
            body: body.into_bytes(),
            headers,
        })
    }
}

/// `n` distinct alphabetic words sharing a prefix.
fn vocabulary(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| {
            let a = (b'a' + (i / 26) as u8) as char;
            let b = (b'a' + (i % 26) as u8) as char;
            format!("{}{}{}", prefix, a, b)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn html(text: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{}\"></a>", l))
        .collect();
    format!(
        "<html><head><title>t</title><script>var ignored = true;</script></head><body><p>{}</p>{}</body></html>",
        text, anchors
    )
}

fn test_config(dir: &TempDir, seeds: &[&str]) -> CrawlConfig {
    CrawlConfig {
        seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
        data_dir: dir.path().to_path_buf(),
        workers: 1,
        worker_delay_ms: 0,
        host_delay_ms: 0,
        min_tokens: 10,
        restart: true,
        ..CrawlConfig::default()
    }
}

fn in_ledger(ledger: &Ledger, url: &str) -> bool {
    let normalized = normalize_url(url).unwrap();
    ledger.get(url_hash(&normalized)).unwrap().is_some()
}

#[tokio::test]
async fn test_end_to_end_single_pass() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .page(
                "https://www.ics.uci.edu/",
                html(
                    &vocabulary("seed", 60),
                    &["http://evil.example.com/", "https://www.ics.uci.edu", "/research"],
                ),
            )
            .page(
                "https://www.ics.uci.edu/research",
                html(&vocabulary("lab", 60), &["/"]),
            ),
    );
    let sink = Arc::new(MemoryReportSink::new());
    let config = test_config(&dir, &["https://www.ics.uci.edu/"]);

    let (pool, report) = WorkerPool::build(&config, site.clone(), sink.clone()).await.unwrap();
    assert_eq!(report.seeded, 1);

    let summary = pool.run().await.unwrap();
    assert_eq!(summary.pages_processed, 2);
    assert_eq!(summary.ledger.total, 2);
    assert_eq!(summary.ledger.completed, 2);
    assert_eq!(summary.ledger.pending, 0);
    assert!(!summary.interrupted);

    let analytics = pool.analytics();
    assert_eq!(analytics.word_frequency("seedaa"), 1);
    assert_eq!(analytics.word_frequency("labaa"), 1);
    assert_eq!(analytics.word_frequency("ignored"), 0);

    let ledger = pool.frontier().ledger();
    assert!(!in_ledger(ledger, "http://evil.example.com/"));
    assert!(in_ledger(ledger, "https://www.ics.uci.edu/research"));

    // out-of-scope hosts are never contacted, not even for robots.txt
    assert!(!site.log.lock().iter().any(|u| u.contains("evil.example.com")));
    assert_eq!(
        site.fetched(),
        vec!["https://www.ics.uci.edu/", "https://www.ics.uci.edu/research"]
    );

    let snapshot = sink.last().unwrap();
    assert_eq!(snapshot.unique_page_count, 2);
    assert_eq!(snapshot.longest_page.unwrap().words, 60);
}

#[tokio::test]
async fn test_resume_requeues_pending_records() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &["https://www.ics.uci.edu/"]);

    {
        let ledger = Ledger::open(config.ledger_path(), true).unwrap();
        for url in ["https://www.ics.uci.edu/", "https://www.ics.uci.edu/people"] {
            ledger.insert_if_absent(url_hash(url), url).unwrap();
        }
        let seed = "https://www.ics.uci.edu/";
        ledger.mark_complete(url_hash(seed), seed).unwrap();
    }

    let site = Arc::new(StubSite::default().page(
        "https://www.ics.uci.edu/people",
        html(&vocabulary("staff", 30), &["/"]),
    ));
    config.restart = false;

    let (pool, report) = WorkerPool::build(&config, site.clone(), Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.seeded, 0);

    let summary = pool.run().await.unwrap();
    assert_eq!(site.fetched(), vec!["https://www.ics.uci.edu/people"]);
    assert_eq!(summary.ledger.completed, 2);
    assert_eq!(summary.ledger.pending, 0);
}

/// Refuses every connection, robots.txt included.
struct Offline;

#[async_trait]
impl Fetcher for Offline {
    async fn fetch(&self, _url: &str) -> Result<FetchResponse, FetchError> {
        Err(FetchError::ConnectionRefused)
    }
}

#[tokio::test]
async fn test_resume_while_offline_keeps_work_pending() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, &["https://www.ics.uci.edu/"]);
    {
        let ledger = Ledger::open(config.ledger_path(), true).unwrap();
        for url in ["https://www.ics.uci.edu/a", "https://www.ics.uci.edu/b"] {
            ledger.insert_if_absent(url_hash(url), url).unwrap();
        }
    }
    config.restart = false;

    let (pool, report) = WorkerPool::build(&config, Arc::new(Offline), Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    assert_eq!(report.replayed, 0);

    let summary = pool.run().await.unwrap();
    assert_eq!(summary.pages_processed, 0);
    assert_eq!(summary.ledger.completed, 0);
    assert_eq!(summary.ledger.pending, 2);
}

#[tokio::test]
async fn test_restart_discards_ledger() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["https://www.ics.uci.edu/"]);
    {
        let ledger = Ledger::open(config.ledger_path(), true).unwrap();
        let stale = "https://www.ics.uci.edu/stale";
        ledger.insert_if_absent(url_hash(stale), stale).unwrap();
    }

    let site = Arc::new(StubSite::default().page(
        "https://www.ics.uci.edu/",
        html(&vocabulary("home", 20), &[]),
    ));
    let (pool, report) = WorkerPool::build(&config, site, Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(report.seeded, 1);

    let summary = pool.run().await.unwrap();
    assert_eq!(summary.ledger.total, 1);
    assert!(!in_ledger(pool.frontier().ledger(), "https://www.ics.uci.edu/stale"));
}

#[tokio::test]
async fn test_traps_and_robots_are_filtered() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .robots("www.ics.uci.edu", "User-agent: *\nDisallow: /private\n")
            .page(
                "https://www.ics.uci.edu/",
                html(
                    &vocabulary("root", 20),
                    &["/a/b/a/b/x", "/a/b/c", "/private/grades", "/slides/deck.pptx"],
                ),
            )
            .page("https://www.ics.uci.edu/a/b/c", html(&vocabulary("leaf", 20), &[])),
    );
    let config = test_config(&dir, &["https://www.ics.uci.edu/"]);

    let (pool, _) = WorkerPool::build(&config, site.clone(), Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    let summary = pool.run().await.unwrap();

    assert_eq!(summary.ledger.total, 2);
    let ledger = pool.frontier().ledger();
    assert!(in_ledger(ledger, "https://www.ics.uci.edu/a/b/c"));
    assert!(!in_ledger(ledger, "https://www.ics.uci.edu/a/b/a/b/x"));
    assert!(!in_ledger(ledger, "https://www.ics.uci.edu/private/grades"));
    assert!(!in_ledger(ledger, "https://www.ics.uci.edu/slides/deck.pptx"));
}

#[tokio::test]
async fn test_duplicate_pages_do_not_propagate_links() {
    let dir = TempDir::new().unwrap();
    let mirrored = vocabulary("mirror", 40);
    let site = Arc::new(
        StubSite::default()
            .page(
                "https://www.ics.uci.edu/",
                html(&vocabulary("index", 40), &["/copy1", "/copy2"]),
            )
            .page("https://www.ics.uci.edu/copy1", html(&mirrored, &["/from-first"]))
            .page("https://www.ics.uci.edu/copy2", html(&mirrored, &["/from-second"]))
            .page("https://www.ics.uci.edu/from-first", html(&vocabulary("child", 40), &[])),
    );
    let config = test_config(&dir, &["https://www.ics.uci.edu/"]);

    let (pool, _) = WorkerPool::build(&config, site, Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    let summary = pool.run().await.unwrap();

    assert_eq!(summary.duplicate_pages, 1);
    assert_eq!(summary.accepted_pages, 3);
    assert_eq!(summary.ledger.total, 4);

    let ledger = pool.frontier().ledger();
    assert!(in_ledger(ledger, "https://www.ics.uci.edu/from-first"));
    assert!(!in_ledger(ledger, "https://www.ics.uci.edu/from-second"));

    // words of the duplicate still count toward the corpus
    assert_eq!(pool.analytics().word_frequency("mirroraa"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_accept_one_mirror() {
    let dir = TempDir::new().unwrap();
    let mirrored = vocabulary("mirror", 40);
    let mirrors: Vec<String> = (1..=6).map(|i| format!("/mirror{}", i)).collect();
    let links: Vec<&str> = mirrors.iter().map(String::as_str).collect();

    let mut site = StubSite::default()
        .latency(Duration::from_millis(50))
        .page("https://www.ics.uci.edu/", html(&vocabulary("index", 40), &links));
    for (i, path) in mirrors.iter().enumerate() {
        let child = format!("/child{}", i + 1);
        site = site
            .page(&format!("https://www.ics.uci.edu{}", path), html(&mirrored, &[child.as_str()]))
            .page(
                &format!("https://www.ics.uci.edu{}", child),
                html(&vocabulary(&format!("child{}x", (b'a' + i as u8) as char), 40), &[]),
            );
    }
    let site = Arc::new(site);

    let mut config = test_config(&dir, &["https://www.ics.uci.edu/"]);
    config.workers = 4;

    let (pool, _) = WorkerPool::build(&config, site.clone(), Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    let summary = pool.run().await.unwrap();

    assert!(site.peak_active.load(Ordering::SeqCst) >= 2);
    assert_eq!(summary.duplicate_pages, 5);
    // the seed, one mirror and that mirror's child
    assert_eq!(summary.accepted_pages, 3);
    assert_eq!(summary.pages_processed, 8);
    assert_eq!(summary.ledger.total, 8);
    assert_eq!(summary.ledger.pending, 0);
    assert!(!summary.interrupted);
    assert_eq!(pool.frontier().next_url(), NextUrl::Exhausted);
    assert_eq!(pool.analytics().word_frequency("mirroraa"), 6);
}

#[tokio::test]
async fn test_hosts_are_visited_round_robin() {
    let dir = TempDir::new().unwrap();
    let mut site = StubSite::default();
    for host in ["alpha", "beta"] {
        let root = format!("https://{}.ics.uci.edu/", host);
        site = site.page(&root, html(&vocabulary(host, 20), &["/one", "/two"]));
        for page in ["one", "two"] {
            let url = format!("https://{}.ics.uci.edu/{}", host, page);
            let prefix = format!("{}{}", host, page);
            site = site.page(&url, html(&vocabulary(&prefix, 20), &[]));
        }
    }
    let site = Arc::new(site);
    let config = test_config(&dir, &["https://alpha.ics.uci.edu/", "https://beta.ics.uci.edu/"]);

    let (pool, _) = WorkerPool::build(&config, site.clone(), Arc::new(MemoryReportSink::new()))
        .await
        .unwrap();
    pool.run().await.unwrap();

    let hosts: Vec<String> = site
        .fetched()
        .iter()
        .map(|u| url::Url::parse(u).unwrap().host_str().unwrap().to_string())
        .collect();
    assert_eq!(hosts.len(), 6);
    for pair in hosts.windows(2) {
        assert_ne!(pair[0], pair[1], "same host fetched twice in a row: {:?}", hosts);
    }
}

#[tokio::test]
async fn test_text_report_written() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        StubSite::default()
            .page(
                "https://www.ics.uci.edu/",
                html(&vocabulary("home", 20), &["https://vision.ics.uci.edu/"]),
            )
            .page("https://vision.ics.uci.edu/", html(&vocabulary("vision", 20), &[])),
    );
    let mut config = test_config(&dir, &["https://www.ics.uci.edu/"]);
    config.report_format = ReportFormat::Text;
    let sink = Arc::new(FileReportSink::new(config.report_path(), config.report_format));

    let (pool, _) = WorkerPool::build(&config, site, sink).await.unwrap();
    pool.run().await.unwrap();

    let text = std::fs::read_to_string(config.report_path()).unwrap();
    assert!(text.starts_with("Unique page count: 2\n"));
    assert!(text.contains("Longest page with 20 words is https://"));
    assert!(text.contains("Subdomains of ics.uci.edu:\nhttps://vision.ics.uci.edu: 1\n"));
}

#[test]
fn test_fingerprint_is_stable_across_calls() {
    let counts: HashMap<String, u64> = [("crawler", 2u64), ("ledger", 1)]
        .into_iter()
        .map(|(w, c)| (w.to_string(), c))
        .collect();
    assert_eq!(
        Fingerprint::from_word_counts(&counts),
        Fingerprint::from_word_counts(&counts.clone())
    );
}
