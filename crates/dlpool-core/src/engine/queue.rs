//! Pending task queue shared by all workers
//!
//! Unbounded FIFO. `pop` is the only place an idle worker blocks. Closing the
//! queue wakes every blocked worker; tasks still queued at that point are
//! left in place and never handed out.

use crate::engine::task::DownloadTask;
use crate::error::DlpoolError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct TaskQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

#[derive(Default)]
struct QueueInner {
    tasks: VecDeque<DownloadTask>,
    closed: bool,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a task. Never blocks; fails only once the queue is closed.
    pub(crate) fn push(&self, task: DownloadTask) -> Result<(), DlpoolError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DlpoolError::InvalidOperation(format!(
                "Cannot submit task {}: engine has been shut down",
                task.id()
            )));
        }
        inner.tasks.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a task is available. Returns `None` once closed.
    pub(crate) fn pop(&self) -> Option<DownloadTask> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(task) = inner.tasks.pop_front() {
                return Some(task);
            }
            self.available.wait(&mut inner);
        }
    }

    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}
