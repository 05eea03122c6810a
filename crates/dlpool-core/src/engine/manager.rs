//! Download engine - owns the task queue and the worker pool
//!
//! This is the top-level coordinator that:
//! - Queues submitted tasks (unbounded FIFO)
//! - Spawns a fixed pool of worker threads on `start`
//! - Fans shutdown and cancel-all signals out to every worker

use crate::config;
use crate::connector::{Connector, HttpConnector};
use crate::engine::queue::TaskQueue;
use crate::engine::task::{DownloadTask, TaskHandle};
use crate::engine::worker::{Worker, WorkerContext, WorkerSignals};
use crate::error::DlpoolError;
use dlpool_types::{EngineConfig, EngineState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to a running worker thread
struct WorkerHandle {
    signals: Arc<WorkerSignals>,
    /// Cleared by the thread itself on exit, so it outlives `join`
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Marks a worker as exited when its thread body returns or unwinds
struct ExitGuard(Arc<AtomicBool>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Download engine that runs tasks on a fixed pool of threads
pub struct DownloadEngine {
    config: EngineConfig,
    /// Custom transport; an [`HttpConnector`] is built on `start` otherwise
    connector: Option<Arc<dyn Connector>>,
    queue: Arc<TaskQueue>,
    workers: Mutex<Vec<WorkerHandle>>,
    state: Mutex<EngineState>,
}

impl DownloadEngine {
    /// Create an idle engine
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connector: None,
            queue: Arc::new(TaskQueue::new()),
            workers: Mutex::new(Vec::new()),
            state: Mutex::new(EngineState::Idle),
        }
    }

    /// Use a custom connector instead of the reqwest-based default
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Tasks submitted but not yet taken by a worker
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Worker threads that have not exited yet
    pub fn live_workers(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|w| w.alive.load(Ordering::Acquire))
            .count()
    }

    // ========================================================================
    // Configuration (only while idle)
    // ========================================================================

    fn ensure_idle(&self, setting: &str) -> Result<(), DlpoolError> {
        match self.state() {
            EngineState::Idle => Ok(()),
            state => Err(DlpoolError::InvalidOperation(format!(
                "Cannot change {} while engine is {:?}",
                setting, state
            ))),
        }
    }

    pub fn set_pool_size(&mut self, pool_size: usize) -> Result<(), DlpoolError> {
        self.ensure_idle("pool size")?;
        if pool_size == 0 {
            return Err(DlpoolError::Config("pool_size must be at least 1".into()));
        }
        self.config.pool_size = pool_size;
        Ok(())
    }

    pub fn set_buffer_size(&mut self, buffer_size: usize) -> Result<(), DlpoolError> {
        self.ensure_idle("buffer size")?;
        if buffer_size == 0 {
            return Err(DlpoolError::Config("buffer_size must be at least 1".into()));
        }
        self.config.buffer_size = buffer_size;
        Ok(())
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) -> Result<(), DlpoolError> {
        self.ensure_idle("connect timeout")?;
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        Ok(())
    }

    /// Default whole-transfer timeout for tasks that don't set their own
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), DlpoolError> {
        self.ensure_idle("read timeout")?;
        self.config.read_timeout_ms = timeout.as_millis() as u64;
        Ok(())
    }

    pub fn set_proxy(&mut self, proxy: Option<String>) -> Result<(), DlpoolError> {
        self.ensure_idle("proxy")?;
        self.config.proxy = proxy;
        Ok(())
    }

    pub fn set_request_method(&mut self, method: &str) -> Result<(), DlpoolError> {
        self.ensure_idle("request method")?;
        self.config.request_method = method.to_uppercase();
        Ok(())
    }

    pub fn add_header(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DlpoolError> {
        self.ensure_idle("headers")?;
        self.config.headers.insert(key.into(), value.into());
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Queue a task. Never blocks; fails once the engine has shut down.
    pub fn submit(&self, task: DownloadTask) -> Result<TaskHandle, DlpoolError> {
        let handle = task.handle();
        debug!("Queueing download {}: {}", task.id(), task.url());
        self.queue.push(task)?;
        Ok(handle)
    }

    /// Spawn the worker pool. An engine can only be started once.
    pub fn start(&self) -> Result<(), DlpoolError> {
        let mut state = self.state.lock();
        match *state {
            EngineState::Idle => {}
            EngineState::Running => {
                return Err(DlpoolError::InvalidOperation(
                    "Engine is already running".into(),
                ))
            }
            EngineState::ShutDown => {
                return Err(DlpoolError::InvalidOperation(
                    "Engine has been shut down; create a new engine".into(),
                ))
            }
        }

        config::validate(&self.config)?;
        let connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(HttpConnector::new(&self.config)?),
        };
        let context = Arc::new(WorkerContext {
            connector,
            buffer_size: self.config.buffer_size,
            default_timeout: self.config.read_timeout(),
        });

        info!(
            "Initializing downloader: {} workers, {} byte buffer",
            self.config.pool_size, self.config.buffer_size
        );

        let mut workers = self.workers.lock();
        for index in 0..self.config.pool_size {
            let signals = Arc::new(WorkerSignals::new());
            let worker = Worker::new(index, self.queue.clone(), signals.clone(), context.clone());
            let alive = Arc::new(AtomicBool::new(true));
            let guard = ExitGuard(alive.clone());
            let spawned = thread::Builder::new()
                .name(format!("dlpool-worker-{}", index))
                .spawn(move || {
                    let _guard = guard;
                    worker.run();
                });

            match spawned {
                Ok(thread) => workers.push(WorkerHandle {
                    signals,
                    alive,
                    thread: Some(thread),
                }),
                Err(e) => {
                    warn!("Failed to spawn worker {}: {}", index, e);
                    self.queue.close();
                    for worker in workers.iter() {
                        worker.signals.shutdown();
                    }
                    *state = EngineState::ShutDown;
                    return Err(e.into());
                }
            }
        }

        *state = EngineState::Running;
        info!("Downloader started, waiting for tasks");
        Ok(())
    }

    /// Stop every worker after its current chunk
    ///
    /// In-flight tasks end with `on_cancel`. Queued tasks stay queued and are
    /// never run. Does not wait for the threads; see [`DownloadEngine::join`].
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::ShutDown {
            return;
        }
        *state = EngineState::ShutDown;

        info!(
            "Shutting down downloader ({} tasks left in queue)",
            self.queue.len()
        );
        self.queue.close();
        for worker in self.workers.lock().iter() {
            worker.signals.shutdown();
        }
    }

    /// Cancel the task each worker is currently running
    ///
    /// Queued tasks are not affected and will still be picked up.
    pub fn cancel_all(&self) {
        info!("Cancelling all running downloads");
        for worker in self.workers.lock().iter() {
            worker.signals.cancel_current();
        }
    }

    /// Wait for every worker thread to exit
    pub fn join(&self) {
        let threads: Vec<_> = self
            .workers
            .lock()
            .iter_mut()
            .filter_map(|w| w.thread.take())
            .collect();

        for thread in threads {
            let name = thread.thread().name().unwrap_or("worker").to_string();
            if thread.join().is_err() {
                warn!("{} exited with a panic", name);
            }
        }
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        if self.state() == EngineState::Running {
            self.shutdown();
        }
    }
}
