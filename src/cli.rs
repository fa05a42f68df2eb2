use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConfigError, CrawlConfig, ReportFormat};

/// Command line for the crawler.
/// Exit codes: 0=success, 2=invalid arguments, 3=config or ledger error
#[derive(Parser, Debug)]
#[command(name = "corpus-crawler")]
#[command(about = "Domain-restricted polite web crawler with corpus analytics")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl the configured domains, resuming from the ledger unless --restart is given.
    Crawl(CrawlArgs),

    /// Print ledger totals without crawling.
    Stats {
        #[arg(short, long, help = "TOML configuration file")]
        config: Option<PathBuf>,

        #[arg(short, long, help = "Directory holding the ledger")]
        data_dir: Option<PathBuf>,

        #[arg(long, help = "Print the totals as JSON")]
        json: bool,
    },
}

/// Flags override values from the configuration file.
#[derive(Args, Debug, Default)]
pub struct CrawlArgs {
    #[arg(short, long, help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short, long = "seed", help = "Seed URL (repeatable)")]
    pub seeds: Vec<String>,

    #[arg(long = "allowed-domain", help = "Domain in scope, subdomains included (repeatable)")]
    pub allowed_domains: Vec<String>,

    #[arg(short, long, help = "Number of concurrent workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Per-worker delay between requests in milliseconds")]
    pub delay_ms: Option<u64>,

    #[arg(long, help = "Minimum gap between requests to one host in milliseconds")]
    pub host_delay_ms: Option<u64>,

    #[arg(short, long, help = "Directory for the ledger and report")]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, help = "User agent string for requests")]
    pub user_agent: Option<String>,

    #[arg(short, long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Discard the existing ledger and start from the seeds")]
    pub restart: bool,

    #[arg(long, help = "Crawl hosts whose robots.txt could not be fetched")]
    pub allow_unknown_robots: bool,

    #[arg(long, value_enum, help = "Report file format")]
    pub report_format: Option<ReportFormat>,

    #[arg(long, help = "Log level when RUST_LOG is unset")]
    pub log_level: Option<String>,
}

impl CrawlArgs {
    /// Load the file (or defaults), apply flags, validate.
    pub fn into_config(self) -> Result<CrawlConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::load(path)?,
            None => CrawlConfig::default(),
        };

        if !self.seeds.is_empty() {
            config.seed_urls = self.seeds;
        }
        if !self.allowed_domains.is_empty() {
            config.allowed_domains = self.allowed_domains;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(delay) = self.delay_ms {
            config.worker_delay_ms = delay;
        }
        if let Some(delay) = self.host_delay_ms {
            config.host_delay_ms = delay;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(agent) = self.user_agent {
            config.user_agent = agent;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(format) = self.report_format {
            config.report_format = format;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.restart |= self.restart;
        config.allow_unknown_robots |= self.allow_unknown_robots;

        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
