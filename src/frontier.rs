use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ledger::{Ledger, LedgerError, LedgerStats, MarkOutcome};
use crate::policy::{PolicyRejection, UrlPolicy};
use crate::url_utils::{self, normalize_url, url_hash};

// In-memory politeness window per host
#[derive(Debug)]
struct HostTracking {
    /// When the next request is allowed (for politeness)
    ready_at: Instant,
}

/// What `next_url` hands back to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextUrl {
    Ready(String),
    /// Work exists but every candidate host is cooling down, or a peer is
    /// still processing a page that may add more.
    Wait(Duration),
    /// No queued URLs and nothing in flight.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadySeen,
    Rejected(PolicyRejection),
}

/// How the frontier was populated at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub replayed: usize,
    pub seeded: usize,
}

#[derive(Debug, Default)]
struct FrontierInner {
    /// Hosts with queued work, in rotation order. Each has a non-empty queue.
    hosts: Vec<String>,
    queues: HashMap<String, VecDeque<String>>,
    cursor: usize,
    host_tracking: HashMap<String, HostTracking>,
    in_flight: usize,
}

impl FrontierInner {
    fn push(&mut self, host: String, url: String) {
        match self.queues.get_mut(&host) {
            Some(queue) => queue.push_back(url),
            None => {
                self.queues.insert(host.clone(), VecDeque::from([url]));
                self.hosts.push(host);
            }
        }
    }

    fn queued(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// Durable ledger plus per-host round-robin queues.
///
/// The ledger and the queues change together under one lock, and every
/// ledger write commits before the call returns.
pub struct Frontier {
    ledger: Ledger,
    policy: Arc<UrlPolicy>,
    inner: Mutex<FrontierInner>,
    host_delay: Duration,
    max_crawl_delay: Duration,
}

impl std::fmt::Debug for Frontier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frontier")
            .field("ledger", &self.ledger)
            .field("host_delay", &self.host_delay)
            .finish()
    }
}

impl Frontier {
    pub fn new(ledger: Ledger, policy: Arc<UrlPolicy>, host_delay: Duration, max_crawl_delay: Duration) -> Self {
        Self {
            ledger,
            policy,
            inner: Mutex::new(FrontierInner::default()),
            host_delay,
            max_crawl_delay,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Fill the queues from the ledger's pending records, or from `seeds`.
    ///
    /// A resume that finds nothing pending, or cannot read the ledger, falls
    /// back to seeding. Seeds already in the ledger are no-ops.
    pub async fn initialize(&self, seeds: &[String], resume: bool) -> Result<InitReport, LedgerError> {
        let mut report = InitReport::default();

        if resume {
            match self.ledger.pending_records() {
                Ok(records) if !records.is_empty() => {
                    let pending = records.len();
                    info!("Resuming with {} pending URLs from {}", pending, self.ledger.path().display());
                    for (hash, record) in records {
                        if self.replay(hash, record.url).await? {
                            report.replayed += 1;
                        }
                    }
                    if report.replayed < pending {
                        info!("{} pending URLs not requeued this run", pending - report.replayed);
                    }
                    return Ok(report);
                }
                Ok(_) => info!("Ledger has no pending URLs, seeding"),
                Err(e) => warn!("Ledger unreadable ({}), seeding instead", e),
            }
        }

        for seed in seeds {
            match self.add_url(seed).await? {
                AddOutcome::Added => report.seeded += 1,
                AddOutcome::AlreadySeen => debug!("Seed {} already in ledger", seed),
                AddOutcome::Rejected(reason) => warn!("Seed {} rejected: {}", seed, reason),
            }
        }
        Ok(report)
    }

    /// Requeue a pending ledger record.
    ///
    /// A record rejected for a reason that can change (robots.txt, scope,
    /// bans) stays pending for a later run. Only permanently invalid URLs
    /// are closed out.
    async fn replay(&self, hash: u128, url: String) -> Result<bool, LedgerError> {
        let host = match self.policy.check(&url).await {
            Ok(parsed) => parsed.host_str().map(|h| h.to_ascii_lowercase()),
            Err(reason) if reason.is_permanent() => {
                debug!("Closing pending {} on resume: {}", url, reason);
                self.ledger.mark_complete(hash, &url)?;
                return Ok(false);
            }
            Err(reason) => {
                debug!("Leaving {} pending on resume: {}", url, reason);
                return Ok(false);
            }
        };

        let Some(host) = host else {
            return Ok(false);
        };
        self.inner.lock().push(host, url);
        Ok(true)
    }

    /// Admit a discovered URL.
    ///
    /// Policy runs first; an unseen normalized URL is recorded as pending in
    /// the ledger and appended to its host's queue.
    pub async fn add_url(&self, raw: &str) -> Result<AddOutcome, LedgerError> {
        if let Err(reason) = self.policy.check(raw).await {
            return Ok(AddOutcome::Rejected(reason));
        }

        let Some(normalized) = normalize_url(raw) else {
            return Ok(AddOutcome::Rejected(PolicyRejection::Malformed));
        };
        let Some(host) = url_utils::extract_host(&normalized) else {
            return Ok(AddOutcome::Rejected(PolicyRejection::Malformed));
        };

        let mut inner = self.inner.lock();
        if !self.ledger.insert_if_absent(url_hash(&normalized), &normalized)? {
            return Ok(AddOutcome::AlreadySeen);
        }
        debug!("Queued {}", normalized);
        inner.push(host, normalized);
        Ok(AddOutcome::Added)
    }

    /// Pop the next URL, visiting hosts round-robin and skipping hosts
    /// still inside their politeness window.
    pub fn next_url(&self) -> NextUrl {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        // forget drained hosts whose politeness window has passed
        let FrontierInner { queues, host_tracking, .. } = &mut *inner;
        host_tracking.retain(|host, tracking| now < tracking.ready_at || queues.contains_key(host));

        let host_count = inner.hosts.len();
        if host_count == 0 {
            return if inner.in_flight > 0 {
                NextUrl::Wait(Duration::from_millis(Config::IDLE_POLL_MS))
            } else {
                NextUrl::Exhausted
            };
        }

        let mut min_wait: Option<Duration> = None;
        for offset in 0..host_count {
            let idx = (inner.cursor + offset) % host_count;
            let host = inner.hosts[idx].clone();

            if let Some(tracking) = inner.host_tracking.get(&host) {
                if now < tracking.ready_at {
                    let wait = tracking.ready_at - now;
                    min_wait = Some(min_wait.map_or(wait, |m| m.min(wait)));
                    continue;
                }
            }

            let (url, drained) = match inner.queues.get_mut(&host) {
                Some(queue) => {
                    let url = queue.pop_front();
                    (url, queue.is_empty())
                }
                None => (None, true),
            };

            if drained {
                inner.queues.remove(&host);
                inner.hosts.remove(idx);
                inner.cursor = if inner.hosts.is_empty() { 0 } else { idx % inner.hosts.len() };
            } else {
                inner.cursor = (idx + 1) % host_count;
            }

            let Some(url) = url else {
                // An empty queue should not be in rotation; try again without it.
                drop(inner);
                return self.next_url();
            };

            let spacing = self.host_spacing(&host);
            inner.host_tracking.insert(host, HostTracking { ready_at: now + spacing });
            inner.in_flight += 1;
            return NextUrl::Ready(url);
        }

        NextUrl::Wait(min_wait.unwrap_or(Duration::from_millis(Config::IDLE_POLL_MS)))
    }

    /// Record a fetch attempt as finished.
    pub fn mark_complete(&self, url: &str) -> Result<(), LedgerError> {
        let normalized = normalize_url(url).unwrap_or_else(|| url.to_string());

        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);

        match self.ledger.mark_complete(url_hash(&normalized), &normalized)? {
            MarkOutcome::Completed => {}
            MarkOutcome::AlreadyCompleted => debug!("{} was already complete", normalized),
            MarkOutcome::Unknown => warn!("Marked unknown URL complete: {}", normalized),
        }
        Ok(())
    }

    pub fn stats(&self) -> FrontierStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        FrontierStats {
            total_hosts: inner.hosts.len(),
            total_queued: inner.queued(),
            hosts_cooling_down: inner
                .hosts
                .iter()
                .filter(|h| inner.host_tracking.get(*h).is_some_and(|t| now < t.ready_at))
                .count(),
            in_flight: inner.in_flight,
            hosts_tracked: inner.host_tracking.len(),
        }
    }

    pub fn ledger_stats(&self) -> Result<LedgerStats, LedgerError> {
        self.ledger.stats()
    }

    /// Minimum gap between two dispatches to `host`.
    fn host_spacing(&self, host: &str) -> Duration {
        let robots_delay = self
            .policy
            .robots()
            .crawl_delay(host)
            .map(|d| d.min(self.max_crawl_delay))
            .unwrap_or_default();
        self.host_delay.max(robots_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FrontierStats {
    pub total_hosts: usize,
    pub total_queued: usize,
    pub hosts_cooling_down: usize,
    pub in_flight: usize,
    /// Hosts with a remembered politeness window.
    pub hosts_tracked: usize,
}

impl std::fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frontier: {} hosts, {} queued URLs, {} cooling down, {} in flight",
            self.total_hosts, self.total_queued, self.hosts_cooling_down, self.in_flight
        )
    }
}
