//! Report sinks for analytics snapshots

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::analytics::AnalyticsSnapshot;
use crate::config::ReportFormat;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives a snapshot after every accepted, non-duplicate page.
pub trait ReportSink: Send + Sync {
    fn emit(&self, snapshot: &AnalyticsSnapshot) -> Result<(), SinkError>;
}

/// Rewrites one report file per snapshot.
///
/// The file is written beside the target and renamed over it, so a reader
/// never sees a half-written report.
#[derive(Debug)]
pub struct FileReportSink {
    path: PathBuf,
    format: ReportFormat,
}

impl FileReportSink {
    pub fn new<P: AsRef<Path>>(path: P, format: ReportFormat) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ReportSink for FileReportSink {
    fn emit(&self, snapshot: &AnalyticsSnapshot) -> Result<(), SinkError> {
        let rendered = match self.format {
            ReportFormat::Text => render_text(snapshot),
            ReportFormat::Json => serde_json::to_string_pretty(snapshot)?,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, rendered).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Plain-text layout of the crawl report.
pub fn render_text(snapshot: &AnalyticsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Unique page count: {}\n", snapshot.unique_page_count);

    match &snapshot.longest_page {
        Some(page) => {
            let _ = writeln!(out, "Longest page with {} words is {}\n", page.words, page.url);
        }
        None => {
            let _ = writeln!(out, "Longest page with 0 words is (none)\n");
        }
    }

    let _ = writeln!(
        out,
        "{} most recurring words in order from greatest to least:",
        snapshot.top_words.len()
    );
    for (word, count) in &snapshot.top_words {
        let _ = writeln!(out, "{}: {}", word, count);
    }

    let _ = writeln!(out, "\nSubdomains of {}:", snapshot.subdomain_suffix);
    for (subdomain, count) in &snapshot.subdomains {
        let _ = writeln!(out, "{}: {}", subdomain, count);
    }
    out
}

/// Keeps snapshots in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    snapshots: Mutex<Vec<AnalyticsSnapshot>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn last(&self) -> Option<AnalyticsSnapshot> {
        self.snapshots.lock().last().cloned()
    }
}

impl ReportSink for MemoryReportSink {
    fn emit(&self, snapshot: &AnalyticsSnapshot) -> Result<(), SinkError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
