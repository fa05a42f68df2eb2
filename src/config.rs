// Global configuration constants - single source of truth

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub struct Config;

impl Config {
    // Crawler timing
    pub const DEFAULT_WORKER_DELAY_MS: u64 = 500;
    pub const DEFAULT_HOST_DELAY_MS: u64 = 500;
    pub const MAX_CRAWL_DELAY_SECS: u64 = 30;
    pub const IDLE_POLL_MS: u64 = 50;

    // HTTP/Network config
    pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const MAX_REDIRECTS: usize = 5;
    pub const POOL_IDLE_PER_HOST: usize = 4;

    // Content bounds
    pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024; // 10MB
    /// The HTTP client downloads up to this multiple of `max_body_bytes`.
    pub const TRANSPORT_BODY_FACTOR: usize = 4;
    pub const MIN_TOKENS: usize = 50;
    pub const MAX_TOKENS: usize = 200_000;

    // Dedup and reporting
    pub const SIMILARITY_THRESHOLD: f64 = 0.95;
    pub const REPORT_TOP_WORDS: usize = 50;

    // Progress logging
    pub const PROGRESS_INTERVAL: u64 = 100;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Output format for the analytics report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
}

/// Crawl scope and runtime settings.
///
/// Every field has a default so a partial TOML file is enough; the defaults
/// describe the UCI ICS crawl this tool was first written for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub user_agent: String,
    pub seed_urls: Vec<String>,
    /// Registrable domains in scope; a host matches on equality or dotted suffix.
    pub allowed_domains: Vec<String>,
    pub banned_domains: Vec<String>,
    /// Hosts under this suffix get a per-subdomain page count in the report.
    pub counted_subdomain_suffix: String,
    pub workers: usize,
    pub worker_delay_ms: u64,
    pub host_delay_ms: u64,
    pub max_crawl_delay_secs: u64,
    pub timeout_secs: u64,
    pub data_dir: PathBuf,
    pub ledger_file: String,
    pub report_file: String,
    pub report_format: ReportFormat,
    /// Discard any previous ledger and start from the seeds.
    pub restart: bool,
    /// Treat hosts whose robots.txt could not be determined as crawlable.
    pub allow_unknown_robots: bool,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub max_body_bytes: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let allowed_domains: Vec<String> = ["ics.uci.edu", "cs.uci.edu", "informatics.uci.edu", "stat.uci.edu"]
            .iter()
            .map(|d| d.to_string())
            .collect();
        let seed_urls = allowed_domains
            .iter()
            .map(|d| format!("https://www.{}", d))
            .collect();

        Self {
            user_agent: "CorpusCrawler/0.1".to_string(),
            seed_urls,
            allowed_domains,
            banned_domains: Vec::new(),
            counted_subdomain_suffix: "ics.uci.edu".to_string(),
            workers: 1,
            worker_delay_ms: Config::DEFAULT_WORKER_DELAY_MS,
            host_delay_ms: Config::DEFAULT_HOST_DELAY_MS,
            max_crawl_delay_secs: Config::MAX_CRAWL_DELAY_SECS,
            timeout_secs: Config::DEFAULT_TIMEOUT_SECS,
            data_dir: PathBuf::from("./data"),
            ledger_file: "frontier.redb".to_string(),
            report_file: "report.txt".to_string(),
            report_format: ReportFormat::Text,
            restart: false,
            allow_unknown_robots: false,
            min_tokens: Config::MIN_TOKENS,
            max_tokens: Config::MAX_TOKENS,
            max_body_bytes: Config::MAX_BODY_BYTES,
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent is empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be > 0".into()));
        }
        if self.allowed_domains.is_empty() {
            return Err(ConfigError::Invalid("no allowed_domains defined".into()));
        }
        if self.seed_urls.is_empty() {
            return Err(ConfigError::Invalid("no seed_urls defined".into()));
        }
        for seed in &self.seed_urls {
            match Url::parse(seed) {
                Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
                _ => return Err(ConfigError::Invalid(format!("seed url {:?} is not an http(s) URL", seed))),
            }
        }
        if self.min_tokens > self.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "min_tokens ({}) exceeds max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join(&self.report_file)
    }

    /// Download cap for the HTTP client. Larger than `max_body_bytes`, so a
    /// moderately oversized page still reaches the scraper and is recorded
    /// as visited there.
    pub fn transport_body_limit(&self) -> usize {
        self.max_body_bytes.saturating_mul(Config::TRANSPORT_BODY_FACTOR)
    }

    pub fn worker_delay(&self) -> Duration {
        Duration::from_millis(self.worker_delay_ms)
    }

    pub fn host_delay(&self) -> Duration {
        Duration::from_millis(self.host_delay_ms)
    }

    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_secs(self.max_crawl_delay_secs)
    }
}
