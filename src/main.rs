use corpus_crawler::cli::{Cli, Commands, CrawlArgs};
use corpus_crawler::config::{ConfigError, CrawlConfig};
use corpus_crawler::ledger::{Ledger, LedgerError};
use corpus_crawler::logging::init_logging;
use corpus_crawler::network::{FetchError, HttpClient};
use corpus_crawler::report::FileReportSink;
use corpus_crawler::worker::{CrawlError, WorkerPool};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawler error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("HTTP client error: {0}")]
    Http(#[from] FetchError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MainError {
    fn exit_code(&self) -> ExitCode {
        match self {
            MainError::Config(_) | MainError::Ledger(_) | MainError::Crawl(_) => ExitCode::from(3),
            _ => ExitCode::FAILURE,
        }
    }
}

async fn run_crawl_command(args: CrawlArgs) -> Result<(), MainError> {
    let config = args.into_config()?;
    let _log_guards = init_logging(&config.log_dir, &config.log_level).map_err(|e| MainError::Logging(e.to_string()))?;

    info!(
        "Crawling {} seed(s) across {:?} with {} worker(s), data in {}",
        config.seed_urls.len(),
        config.allowed_domains,
        config.workers,
        config.data_dir.display()
    );

    let fetcher = Arc::new(HttpClient::new(&config.user_agent, config.timeout_secs, config.transport_body_limit())?);
    let sink = Arc::new(FileReportSink::new(config.report_path(), config.report_format));

    let (pool, _) = WorkerPool::build(&config, fetcher, sink).await?;

    let shutdown = pool.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight pages");
            shutdown.stop();
        }
    });

    let summary = pool.run().await?;
    if summary.interrupted {
        info!("Stopped early; rerun without --restart to resume");
    }
    println!("{}", summary);
    println!("Report: {}", config.report_path().display());
    Ok(())
}

fn run_stats_command(config_path: Option<PathBuf>, data_dir: Option<PathBuf>, json: bool) -> Result<(), MainError> {
    let mut config = match config_path {
        Some(path) => CrawlConfig::load(path)?,
        None => CrawlConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    let path = config.ledger_path();
    if !path.exists() {
        return Err(MainError::Config(ConfigError::Invalid(format!(
            "no ledger at {}",
            path.display()
        ))));
    }

    let stats = Ledger::open_existing(&path)?.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{}: {} URLs ({} completed, {} pending)",
            path.display(),
            stats.total,
            stats.completed,
            stats.pending
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl_command(args).await,
        Commands::Stats { config, data_dir, json } => run_stats_command(config, data_dir, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}
