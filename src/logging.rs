/// Logging setup: daily-rotated text and JSON files plus a compact stdout layer.
///
/// `RUST_LOG` takes precedence over the configured level, e.g.
/// `RUST_LOG=corpus_crawler=debug,reqwest=warn`.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const TEXT_LOG_FILE: &str = "crawler.log";
pub const JSON_LOG_FILE: &str = "crawler.json.log";

/// Flushes the background log writers when dropped. Hold it for the life of the process.
#[must_use = "dropping the guards stops file logging"]
pub struct LogGuards {
    _text: WorkerGuard,
    _json: WorkerGuard,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if the log directory cannot be
/// created or a subscriber is already set.
pub fn init_logging<P: AsRef<Path>>(log_dir: P, default_level: &str) -> Result<LogGuards, Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let filter = env_filter(default_level);

    let text_file_appender = tracing_appender::rolling::daily(log_path, TEXT_LOG_FILE);
    let (text_writer, text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, JSON_LOG_FILE);
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(filter.clone());

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::info!("Logging initialized - logs will be written to {}", log_path.display());

    Ok(LogGuards {
        _text: text_guard,
        _json: json_guard,
    })
}
