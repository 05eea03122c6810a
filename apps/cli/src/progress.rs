//! Progress bar utilities for CLI downloads

use console::style;
use dlpool_types::ProgressEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}";

/// Manages progress bars for multiple downloads
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: HashMap<Uuid, ProgressBar>,
}

impl DownloadProgress {
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };

        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    /// Known length gets a bar, unknown length a spinner
    fn create_bar(&self, filename: &str, size: Option<u64>) -> ProgressBar {
        let pb = match size {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::with_template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓▒░  "),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        };

        pb.set_message(filename.to_string());
        self.multi.add(pb)
    }

    /// Update a progress bar from an event
    pub fn handle_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { id, filename, size } => {
                let pb = self.create_bar(filename, *size);
                self.bars.insert(*id, pb);
            }

            ProgressEvent::Progress { id, total, .. } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.set_position(*total);
                }
            }

            ProgressEvent::Completed { id } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.finish_with_message(format!("{} Download complete", style("✓").green().bold()));
                }
            }

            ProgressEvent::Cancelled { id } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.abandon_with_message(format!("{} Cancelled", style("○").dim()));
                }
            }

            ProgressEvent::Failed { id, error } => {
                if let Some(pb) = self.bars.get(id) {
                    pb.abandon_with_message(format!("{} Failed: {}", style("✗").red().bold(), error));
                }
            }
        }
    }

    /// Clear all progress bars
    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}
