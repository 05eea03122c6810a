//! Progress listeners
//!
//! Listeners are called synchronously on the worker thread that executes the
//! task, in the order they were added to the task.

use crate::error::DlpoolError;
use dlpool_types::ProgressEvent;
use std::sync::mpsc::Sender;
use uuid::Uuid;

/// Receives progress callbacks for one task
///
/// Per listener the sequence is one `on_start`, zero or more `on_update`,
/// then exactly one of `on_complete`, `on_cancel` or `on_error`. A task that
/// fails to connect skips `on_start` and goes straight to `on_error`.
pub trait ProgressListener: Send + Sync {
    /// `size` is `None` when the length is unknown; treat it as indeterminate
    /// progress rather than computing a percentage.
    fn on_start(&self, filename: &str, size: Option<u64>);

    fn on_update(&self, chunk: usize, total: u64);

    fn on_complete(&self);

    fn on_cancel(&self) {}

    /// The transfer failed. Defaults to reporting a cancellation.
    fn on_error(&self, _error: &DlpoolError) {
        self.on_cancel();
    }
}

/// Forwards callbacks as [`ProgressEvent`]s over a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    id: Uuid,
    tx: Sender<ProgressEvent>,
}

impl ChannelListener {
    pub fn new(id: Uuid, tx: Sender<ProgressEvent>) -> Self {
        Self { id, tx }
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching anymore
        let _ = self.tx.send(event);
    }
}

impl ProgressListener for ChannelListener {
    fn on_start(&self, filename: &str, size: Option<u64>) {
        self.send(ProgressEvent::Started {
            id: self.id,
            filename: filename.to_string(),
            size,
        });
    }

    fn on_update(&self, chunk: usize, total: u64) {
        self.send(ProgressEvent::Progress {
            id: self.id,
            chunk,
            total,
        });
    }

    fn on_complete(&self) {
        self.send(ProgressEvent::Completed { id: self.id });
    }

    fn on_cancel(&self) {
        self.send(ProgressEvent::Cancelled { id: self.id });
    }

    fn on_error(&self, error: &DlpoolError) {
        self.send(ProgressEvent::Failed {
            id: self.id,
            error: error.to_string(),
        });
    }
}
