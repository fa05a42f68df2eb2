pub mod analytics;
pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod frontier;
pub mod ledger;
pub mod logging;
pub mod network;
pub mod policy;
pub mod report;
pub mod robots;
pub mod scraper;
pub mod url_utils;
pub mod worker;

// Re-export main types for library usage
pub use analytics::{Analytics, AnalyticsSnapshot};
pub use config::{CrawlConfig, ReportFormat};
pub use fingerprint::{Fingerprint, FingerprintSet};
pub use frontier::{AddOutcome, Frontier, NextUrl};
pub use ledger::{Ledger, LedgerError, LedgerStats, UrlRecord};
pub use network::{FetchError, FetchResponse, Fetcher, HttpClient};
pub use policy::{PolicyRejection, UrlPolicy};
pub use report::{FileReportSink, MemoryReportSink, ReportSink};
pub use robots::{RobotsCache, RobotsTxt};
pub use scraper::{PageRejection, Scraper};
pub use worker::{CrawlError, CrawlSummary, WorkerPool};
