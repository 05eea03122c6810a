//! Output formatting for download reports

use crate::OutputFormat;
use console::style;
use dlpool_types::TaskStatus;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Print output in the specified format
pub fn print_output<T: Serialize + fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Human => print!("{}", value),
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// `received of size`, or just `received` when the server sent no length
pub fn format_transfer(received: u64, size: Option<u64>) -> String {
    match size {
        Some(size) => format!("{} of {}", format_bytes(received), format_bytes(size)),
        None => format_bytes(received),
    }
}

/// Outcome of one download
#[derive(Debug, Serialize)]
pub struct DownloadSummary {
    pub id: Uuid,
    pub url: String,
    pub path: PathBuf,
    /// Name announced by the server, if the transfer got that far
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub bytes: u64,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl DownloadSummary {
    pub fn queued(id: Uuid, url: String, path: PathBuf) -> Self {
        Self {
            id,
            url,
            path,
            filename: None,
            size: None,
            bytes: 0,
            status: TaskStatus::Queued,
            error: None,
        }
    }
}

/// Summary of a whole `get` run
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct Report(pub Vec<DownloadSummary>);

impl Report {
    /// Downloads that did not complete
    pub fn failures(&self) -> usize {
        self.0
            .iter()
            .filter(|s| s.status != TaskStatus::Completed)
            .count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for summary in &self.0 {
            let marker = match summary.status {
                TaskStatus::Completed => style("✓").green().bold(),
                TaskStatus::Cancelled => style("○").dim(),
                _ => style("✗").red().bold(),
            };
            write!(
                f,
                "{} {} ({})",
                marker,
                summary.path.display(),
                format_transfer(summary.bytes, summary.size)
            )?;
            if let Some(error) = &summary.error {
                write!(f, " - {}", error)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
