//! Transfer task - one requested download
//!
//! A [`DownloadTask`] owns its sink and its listeners. Submitting it to the
//! engine moves it, so the listener list can only be changed before
//! submission. Callers keep a [`TaskHandle`] to pause, resume or cancel the
//! transfer while a worker owns the task.

use crate::engine::listener::ProgressListener;
use crate::error::DlpoolError;
use dlpool_types::{Credential, TaskStatus};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

/// Identifies a listener registered on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Control flags shared between the owning worker and any number of handles
pub(crate) struct TaskControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

struct ControlState {
    paused: bool,
    cancelled: bool,
    status: TaskStatus,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                paused: false,
                cancelled: false,
                status: TaskStatus::Queued,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        state.paused = paused;
        self.changed.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.changed.notify_all();
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        let mut state = self.state.lock();
        state.status = status;
        self.changed.notify_all();
    }

    /// Wake a worker parked in [`TaskControl::wait_while_paused`] so it can
    /// re-check its own signals.
    pub(crate) fn wake(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }

    /// Park until the task is resumed, cancelled, or `interrupted` reports a
    /// worker-level signal. Whoever sets such a signal must call `wake`.
    pub(crate) fn wait_while_paused(&self, interrupted: impl Fn() -> bool) {
        let mut state = self.state.lock();
        if !state.paused || state.cancelled || interrupted() {
            return;
        }

        let resumed_status = state.status;
        state.status = TaskStatus::Paused;
        self.changed.notify_all();

        while state.paused && !state.cancelled && !interrupted() {
            self.changed.wait(&mut state);
        }

        state.status = resumed_status;
        self.changed.notify_all();
    }

    fn wait_terminal(&self, deadline: Option<Instant>) -> Option<TaskStatus> {
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        state.status.is_terminal().then_some(state.status)
    }
}

/// Cloneable control surface for a submitted task
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    control: Arc<TaskControl>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Suspend the transfer at the next chunk boundary
    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    /// Clear the pause flag and wake the parked worker
    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    /// Abort the transfer at the next chunk boundary. Idempotent.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn status(&self) -> TaskStatus {
        self.control.status()
    }

    /// Block until the task completes, is cancelled or fails
    ///
    /// Never returns for a task that stays queued, e.g. after shutdown.
    pub fn wait(&self) -> TaskStatus {
        self.control
            .wait_terminal(None)
            .unwrap_or_else(|| self.control.status())
    }

    /// Like [`TaskHandle::wait`], giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskStatus> {
        self.control.wait_terminal(Some(Instant::now() + timeout))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// A single download: where to read from, where to write to, who to tell
pub struct DownloadTask {
    id: Uuid,
    url: Url,
    sink: Box<dyn Write + Send>,
    listeners: Vec<(ListenerId, Arc<dyn ProgressListener>)>,
    next_listener: u64,
    /// Whole-transfer read timeout; the engine default applies when unset
    timeout: Option<Duration>,
    credential: Option<Credential>,
    control: Arc<TaskControl>,
}

/// A task taken apart by the worker that executes it
pub(crate) struct TaskParts {
    pub id: Uuid,
    pub url: Url,
    pub sink: Box<dyn Write + Send>,
    pub listeners: Vec<Arc<dyn ProgressListener>>,
    pub timeout: Option<Duration>,
    pub credential: Option<Credential>,
    pub control: Arc<TaskControl>,
}

impl DownloadTask {
    /// Create a task writing the body of `url` into `sink`
    pub fn new(url: &str, sink: impl Write + Send + 'static) -> Result<Self, DlpoolError> {
        Ok(Self::from_url(Url::parse(url)?, sink))
    }

    pub fn from_url(url: Url, sink: impl Write + Send + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            sink: Box::new(sink),
            listeners: Vec::new(),
            next_listener: 0,
            timeout: None,
            credential: None,
            control: Arc::new(TaskControl::new()),
        }
    }

    /// Create a task writing into a newly created file at `path`
    pub fn to_file(url: &str, path: impl AsRef<Path>) -> Result<Self, DlpoolError> {
        let url = Url::parse(url)?;
        let file = File::create(path.as_ref())?;
        Ok(Self::from_url(url, BufWriter::new(file)))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            control: self.control.clone(),
        }
    }

    pub fn with_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.add_listener(Arc::new(listener));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn set_credential(&mut self, credential: Option<Credential>) {
        self.credential = credential;
    }

    /// Register a listener; listeners are notified in insertion order
    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns `false` if no listener with that id is registered
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub(crate) fn into_parts(self) -> TaskParts {
        TaskParts {
            id: self.id,
            url: self.url,
            sink: self.sink,
            listeners: self.listeners.into_iter().map(|(_, l)| l).collect(),
            timeout: self.timeout,
            credential: self.credential,
            control: self.control,
        }
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("listeners", &self.listeners.len())
            .field("timeout", &self.timeout)
            .field("status", &self.control.status())
            .finish_non_exhaustive()
    }
}
