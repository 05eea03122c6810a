//! In-memory connector, listeners, sinks and a loopback HTTP server for tests

use crate::connector::{filename_from_url, ConnectRequest, Connection, Connector};
use crate::engine::listener::ProgressListener;
use crate::error::DlpoolError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

enum Route {
    Body {
        data: Vec<u8>,
        announce_length: bool,
        filename: Option<String>,
    },
    Refuse,
}

/// Serves canned bodies keyed by URL
#[derive(Default)]
pub(crate) struct MockConnector {
    routes: Mutex<HashMap<String, Route>>,
    opened: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn serve(&self, url: &str, data: Vec<u8>) {
        self.routes.lock().insert(
            url.to_string(),
            Route::Body {
                data,
                announce_length: true,
                filename: None,
            },
        );
    }

    pub(crate) fn serve_unknown_length(&self, url: &str, data: Vec<u8>) {
        self.routes.lock().insert(
            url.to_string(),
            Route::Body {
                data,
                announce_length: false,
                filename: None,
            },
        );
    }

    pub(crate) fn serve_named(&self, url: &str, filename: &str, data: Vec<u8>) {
        self.routes.lock().insert(
            url.to_string(),
            Route::Body {
                data,
                announce_length: true,
                filename: Some(filename.to_string()),
            },
        );
    }

    pub(crate) fn refuse(&self, url: &str) {
        self.routes.lock().insert(url.to_string(), Route::Refuse);
    }

    /// Number of `open` calls so far
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn open(&self, request: &ConnectRequest<'_>) -> Result<Connection, DlpoolError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let routes = self.routes.lock();
        match routes.get(request.url.as_str()) {
            Some(Route::Body {
                data,
                announce_length,
                filename,
            }) => Ok(Connection {
                filename: filename
                    .clone()
                    .unwrap_or_else(|| filename_from_url(request.url)),
                content_length: announce_length.then_some(data.len() as u64),
                reader: Box::new(Cursor::new(data.clone())),
            }),
            Some(Route::Refuse) => Err(DlpoolError::Connection("connection refused".into())),
            None => Err(DlpoolError::Connection(format!(
                "no route for {}",
                request.url
            ))),
        }
    }
}

/// One recorded listener callback
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Start(String, Option<u64>),
    Update(usize, u64),
    Complete,
    Cancel,
    Error(String),
}

/// Listener that records every callback
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn updates(&self) -> Vec<(usize, u64)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Update(chunk, total) => Some((*chunk, *total)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, wanted: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    pub(crate) fn starts(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Start(..)))
            .count()
    }
}

impl ProgressListener for Recorder {
    fn on_start(&self, filename: &str, size: Option<u64>) {
        self.events
            .lock()
            .push(Event::Start(filename.to_string(), size));
    }

    fn on_update(&self, chunk: usize, total: u64) {
        self.events.lock().push(Event::Update(chunk, total));
    }

    fn on_complete(&self) {
        self.events.lock().push(Event::Complete);
    }

    fn on_cancel(&self) {
        self.events.lock().push(Event::Cancel);
    }

    fn on_error(&self, error: &DlpoolError) {
        self.events.lock().push(Event::Error(error.to_string()));
    }
}

/// Listener that runs a closure on every update
pub(crate) struct OnUpdate<F>(pub F);

impl<F> ProgressListener for OnUpdate<F>
where
    F: Fn(usize, u64) + Send + Sync,
{
    fn on_start(&self, _filename: &str, _size: Option<u64>) {}

    fn on_update(&self, chunk: usize, total: u64) {
        (self.0)(chunk, total)
    }

    fn on_complete(&self) {}
}

/// Sink writing into shared memory; records when it is dropped
pub(crate) struct SharedSink {
    data: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side view of a [`SharedSink`]
#[derive(Clone)]
pub(crate) struct SinkProbe {
    data: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl SharedSink {
    pub(crate) fn new() -> (Self, SinkProbe) {
        let data = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let probe = SinkProbe {
            data: data.clone(),
            closed: closed.clone(),
        };
        (Self { data, closed }, probe)
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SharedSink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl SinkProbe {
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// `len` bytes of a repeating, position-dependent pattern
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Accept one connection on a loopback port, reply with `response` verbatim
/// and keep the socket open for `linger`
///
/// Returns the base URL and a receiver for the raw request head.
pub(crate) fn serve_once(response: Vec<u8>, linger: Duration) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
        let _ = stream.write_all(&response);
        let _ = stream.flush();
        thread::sleep(linger);
    });

    (base, rx)
}
