//! Worker - one pool thread
//!
//! Each worker repeatedly takes a task off the shared queue and drives the
//! transfer: connect, then read a chunk, write it, notify listeners and check
//! control signals, until end of stream. Signals are only observed between
//! chunks, so pause and cancel latency is bounded by one buffer read.

use crate::connector::{ConnectRequest, Connector};
use crate::engine::listener::ProgressListener;
use crate::engine::queue::TaskQueue;
use crate::engine::task::{DownloadTask, TaskControl, TaskParts};
use crate::error::DlpoolError;
use dlpool_types::TaskStatus;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Engine-to-worker signals, checked once per chunk
pub(crate) struct WorkerSignals {
    cancel: AtomicBool,
    shutdown: AtomicBool,
    /// Control of the task being executed, so signals can wake a paused worker
    current: Mutex<Option<Arc<TaskControl>>>,
}

impl WorkerSignals {
    pub(crate) fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Abort the task currently being executed, if any
    pub(crate) fn cancel_current(&self) {
        let current = self.current.lock();
        self.cancel.store(true, Ordering::Release);
        if let Some(control) = current.as_ref() {
            control.wake();
        }
    }

    /// Abort the current task and stop taking new ones
    pub(crate) fn shutdown(&self) {
        let current = self.current.lock();
        self.shutdown.store(true, Ordering::Release);
        if let Some(control) = current.as_ref() {
            control.wake();
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn interrupted(&self) -> bool {
        self.cancel_requested() || self.shutdown_requested()
    }

    /// A cancel-all aimed at a previous task must not leak into this one
    fn begin(&self, control: Arc<TaskControl>) {
        let mut current = self.current.lock();
        self.cancel.store(false, Ordering::Release);
        *current = Some(control);
    }

    fn finish(&self) {
        self.current.lock().take();
    }
}

/// Settings shared by every worker of one engine
pub(crate) struct WorkerContext {
    pub connector: Arc<dyn Connector>,
    pub buffer_size: usize,
    pub default_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Worker {
    index: usize,
    queue: Arc<TaskQueue>,
    signals: Arc<WorkerSignals>,
    context: Arc<WorkerContext>,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        queue: Arc<TaskQueue>,
        signals: Arc<WorkerSignals>,
        context: Arc<WorkerContext>,
    ) -> Self {
        Self {
            index,
            queue,
            signals,
            context,
        }
    }

    /// Worker thread body; returns once the engine shuts down
    pub(crate) fn run(self) {
        debug!("Worker {} waiting for tasks", self.index);

        while !self.signals.shutdown_requested() {
            let Some(task) = self.queue.pop() else {
                break;
            };

            let control = task.control().clone();
            match panic::catch_unwind(AssertUnwindSafe(|| self.execute(task))) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(_) => {
                    error!("Worker {} recovered from a panic while running a task", self.index);
                    self.signals.finish();
                    control.set_status(TaskStatus::Interrupted);
                }
            }
        }

        info!("Worker {} stopped", self.index);
    }

    /// Run one task to completion, cancellation or failure
    fn execute(&self, task: DownloadTask) -> Flow {
        let TaskParts {
            id,
            url,
            mut sink,
            listeners,
            timeout,
            credential,
            control,
        } = task.into_parts();

        self.signals.begin(control.clone());
        info!("Worker {} starting download {}: {}", self.index, id, url);

        let request = ConnectRequest {
            url: &url,
            credential: credential.as_ref(),
            timeout: timeout.unwrap_or(self.context.default_timeout),
        };
        let result = self.transfer(&request, &mut sink, &listeners, &control);

        // Both streams are closed before listeners hear the outcome
        drop(sink);
        self.signals.finish();

        match result {
            Ok(total) => {
                info!("Download {} complete ({} bytes)", id, total);
                for listener in &listeners {
                    listener.on_complete();
                }
                control.set_status(TaskStatus::Completed);
                Flow::Continue
            }
            Err(DlpoolError::Cancelled) => {
                info!("Download {} cancelled", id);
                for listener in &listeners {
                    listener.on_cancel();
                }
                control.set_status(TaskStatus::Cancelled);
                Flow::Continue
            }
            Err(DlpoolError::Shutdown) => {
                info!("Download {} stopped by shutdown", id);
                for listener in &listeners {
                    listener.on_cancel();
                }
                control.set_status(TaskStatus::Cancelled);
                Flow::Stop
            }
            Err(e) => {
                error!("Download {} failed: {}", id, e);
                for listener in &listeners {
                    listener.on_error(&e);
                }
                control.set_status(TaskStatus::Interrupted);
                Flow::Continue
            }
        }
    }

    /// Returns the number of bytes written
    fn transfer(
        &self,
        request: &ConnectRequest<'_>,
        sink: &mut dyn Write,
        listeners: &[Arc<dyn ProgressListener>],
        control: &TaskControl,
    ) -> Result<u64, DlpoolError> {
        // Cancelled while still queued: don't bother connecting
        self.check_signals(control)?;

        control.set_status(TaskStatus::Connecting);
        let connection = self.context.connector.open(request)?;
        control.set_status(TaskStatus::Transferring);

        debug!(
            "Connected to {} (filename: {}, length: {:?})",
            request.url, connection.filename, connection.content_length
        );
        for listener in listeners {
            listener.on_start(&connection.filename, connection.content_length);
        }

        let mut reader = connection.reader;
        let mut buffer = vec![0u8; self.context.buffer_size];
        let mut total: u64 = 0;

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DlpoolError::from_body_read(e)),
            };

            sink.write_all(&buffer[..read])?;
            total += read as u64;

            for listener in listeners {
                listener.on_update(read, total);
            }

            self.checkpoint(control)?;
        }

        sink.flush()?;
        Ok(total)
    }

    /// Cancel beats shutdown; neither waits
    fn check_signals(&self, control: &TaskControl) -> Result<(), DlpoolError> {
        if self.signals.cancel_requested() || control.is_cancelled() {
            return Err(DlpoolError::Cancelled);
        }
        if self.signals.shutdown_requested() {
            return Err(DlpoolError::Shutdown);
        }
        Ok(())
    }

    /// Chunk boundary: honour cancel and shutdown, park while paused
    fn checkpoint(&self, control: &TaskControl) -> Result<(), DlpoolError> {
        loop {
            self.check_signals(control)?;
            if !control.is_paused() {
                return Ok(());
            }
            debug!("Worker {} paused", self.index);
            control.wait_while_paused(|| self.signals.interrupted());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::HttpConnector;
    use crate::engine::testing::{
        payload, serve_once, Event, MockConnector, OnUpdate, Recorder, SharedSink,
    };
    use dlpool_types::EngineConfig;

    fn worker(connector: Arc<MockConnector>, buffer_size: usize) -> (Worker, Arc<TaskQueue>) {
        let queue = Arc::new(TaskQueue::new());
        let context = Arc::new(WorkerContext {
            connector,
            buffer_size,
            default_timeout: Duration::from_secs(5),
        });
        let worker = Worker::new(0, queue.clone(), Arc::new(WorkerSignals::new()), context);
        (worker, queue)
    }

    #[test]
    fn test_execute_streams_whole_body() {
        let connector = MockConnector::new();
        connector.serve("http://mirror.test/a.bin", payload(5000));
        let (worker, _) = worker(connector, 1024);

        let recorder = Recorder::new();
        let (sink, probe) = SharedSink::new();
        let task = DownloadTask::new("http://mirror.test/a.bin", sink)
            .unwrap()
            .with_listener(recorder.clone());
        let handle = task.handle();

        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(handle.status(), TaskStatus::Completed);
        assert_eq!(probe.bytes(), payload(5000));
        assert!(probe.is_closed());

        let events = recorder.events();
        assert_eq!(events.first(), Some(&Event::Start("a.bin".into(), Some(5000))));
        assert_eq!(events.last(), Some(&Event::Complete));
        assert_eq!(recorder.updates().len(), 5);
    }

    #[test]
    fn test_connect_failure_reports_error_without_start() {
        let connector = MockConnector::new();
        connector.refuse("http://mirror.test/down");
        let (worker, _) = worker(connector, 1024);

        let recorder = Recorder::new();
        let task = DownloadTask::new("http://mirror.test/down", Vec::new())
            .unwrap()
            .with_listener(recorder.clone());
        let handle = task.handle();

        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(handle.status(), TaskStatus::Interrupted);
        assert_eq!(
            recorder.events(),
            vec![Event::Error("Connection error: connection refused".into())]
        );
    }

    #[test]
    fn test_cancelled_before_dequeue_never_connects() {
        let connector = MockConnector::new();
        connector.serve("http://mirror.test/a.bin", payload(10));
        let (worker, _) = worker(connector.clone(), 1024);

        let recorder = Recorder::new();
        let task = DownloadTask::new("http://mirror.test/a.bin", Vec::new())
            .unwrap()
            .with_listener(recorder.clone());
        task.handle().cancel();

        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(connector.opened(), 0);
        assert_eq!(recorder.events(), vec![Event::Cancel]);
    }

    #[test]
    fn test_shutdown_signal_stops_worker() {
        let connector = MockConnector::new();
        connector.serve("http://mirror.test/a.bin", payload(4096));
        let (worker, _) = worker(connector, 1024);

        let recorder = Recorder::new();
        let signals = worker.signals.clone();
        let task = DownloadTask::new("http://mirror.test/a.bin", Vec::new())
            .unwrap()
            .with_listener(OnUpdate(move |_, _| signals.shutdown()))
            .with_listener(recorder.clone());

        assert_eq!(worker.execute(task), Flow::Stop);
        assert_eq!(recorder.updates(), vec![(1024, 1024)]);
        assert_eq!(recorder.count(&Event::Cancel), 1);
        assert_eq!(recorder.count(&Event::Complete), 0);
    }

    #[test]
    fn test_cancel_all_flag_cleared_for_next_task() {
        let connector = MockConnector::new();
        connector.serve("http://mirror.test/a.bin", payload(4096));
        connector.serve("http://mirror.test/b.bin", payload(4096));
        let (worker, _) = worker(connector, 1024);

        let signals = worker.signals.clone();
        let first = Recorder::new();
        let task = DownloadTask::new("http://mirror.test/a.bin", Vec::new())
            .unwrap()
            .with_listener(OnUpdate(move |_, _| signals.cancel_current()))
            .with_listener(first.clone());
        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(first.count(&Event::Cancel), 1);

        let second = Recorder::new();
        let task = DownloadTask::new("http://mirror.test/b.bin", Vec::new())
            .unwrap()
            .with_listener(second.clone());
        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(second.count(&Event::Complete), 1);
    }

    #[test]
    fn test_run_survives_failures_and_exits_on_close() {
        let connector = MockConnector::new();
        connector.refuse("http://mirror.test/bad");
        connector.serve("http://mirror.test/good.bin", payload(100));
        let (worker, queue) = worker(connector, 64);

        let bad = DownloadTask::new("http://mirror.test/bad", Vec::new()).unwrap();
        let good = DownloadTask::new("http://mirror.test/good.bin", Vec::new()).unwrap();
        let bad_handle = bad.handle();
        let good_handle = good.handle();
        queue.push(bad).unwrap();
        queue.push(good).unwrap();

        let thread = std::thread::spawn(move || worker.run());
        assert_eq!(good_handle.wait(), TaskStatus::Completed);
        assert_eq!(bad_handle.status(), TaskStatus::Interrupted);

        queue.close();
        thread.join().unwrap();
    }

    #[test]
    fn test_panicking_listener_does_not_kill_worker() {
        let connector = MockConnector::new();
        connector.serve("http://mirror.test/a.bin", payload(10));
        connector.serve("http://mirror.test/b.bin", payload(10));
        let (worker, queue) = worker(connector, 64);

        let boom = DownloadTask::new("http://mirror.test/a.bin", Vec::new())
            .unwrap()
            .with_listener(OnUpdate(|_, _| panic!("listener bug")));
        let fine = DownloadTask::new("http://mirror.test/b.bin", Vec::new()).unwrap();
        let boom_handle = boom.handle();
        let fine_handle = fine.handle();
        queue.push(boom).unwrap();
        queue.push(fine).unwrap();

        let thread = std::thread::spawn(move || worker.run());
        assert_eq!(fine_handle.wait(), TaskStatus::Completed);
        assert_eq!(boom_handle.status(), TaskStatus::Interrupted);

        queue.close();
        thread.join().unwrap();
    }

    #[test]
    fn test_stalled_body_fails_with_timeout() {
        // 2 of 100 announced bytes, then silence
        let (base, _request) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nab".to_vec(),
            Duration::from_secs(5),
        );
        let context = Arc::new(WorkerContext {
            connector: Arc::new(HttpConnector::new(&EngineConfig::default()).unwrap()),
            buffer_size: 1024,
            default_timeout: Duration::from_secs(5),
        });
        let worker = Worker::new(
            0,
            Arc::new(TaskQueue::new()),
            Arc::new(WorkerSignals::new()),
            context,
        );

        let recorder = Recorder::new();
        let task = DownloadTask::new(&format!("{}/stall.bin", base), Vec::new())
            .unwrap()
            .with_timeout(Duration::from_millis(500))
            .with_listener(recorder.clone());
        let handle = task.handle();

        assert_eq!(worker.execute(task), Flow::Continue);
        assert_eq!(handle.status(), TaskStatus::Interrupted);

        let events = recorder.events();
        assert_eq!(events.first(), Some(&Event::Start("stall.bin".into(), Some(100))));
        assert_eq!(events.last(), Some(&Event::Error("Timeout".into())));
        assert_eq!(recorder.count(&Event::Complete), 0);
    }
}
