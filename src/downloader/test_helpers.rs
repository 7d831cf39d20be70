//! Shared test helpers: a scripted in-memory transport and event collection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::downloader::BatchDownloader;
use crate::error::DownloadError;
use crate::http::{ResponseBody, Transport};
use crate::types::{Event, EventKind, Request};

/// Base URL used for every scripted route
pub(crate) const BASE: &str = "http://fake.test";

pub(crate) fn url(path: &str) -> String {
    format!("{}/{}", BASE, path)
}

pub(crate) fn request(path: &str) -> Request {
    Request::new(url(path)).unwrap()
}

/// How a scripted GET behaves
#[derive(Clone)]
pub(crate) enum Script {
    /// 200 with the given chunks, sleeping `delay` before each one
    Body { chunks: Vec<Bytes>, delay: Duration },
    /// Non-success status
    Status(u16),
    /// Connection-level failure
    NetworkError,
    /// The GET never resolves
    Hang,
    /// Deliver one chunk, then never send another
    Stall(Bytes),
}

/// In-memory [`Transport`] driven by per-URL scripts
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Script>>,
    sizes: Mutex<HashMap<String, u64>>,
    /// When set, HEAD requests wait for this token before answering
    probe_gate: Mutex<Option<CancellationToken>>,
    gets_started: AtomicUsize,
    heads_started: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, path: &str, script: Script) {
        self.routes.lock().unwrap().insert(url(path), script);
    }

    /// Serve `body` in chunks of at most 64 bytes and advertise its length
    pub(crate) fn body(&self, path: &str, body: &[u8]) {
        self.slow_body(path, body, Duration::ZERO);
    }

    pub(crate) fn slow_body(&self, path: &str, body: &[u8], delay: Duration) {
        let chunks = chunked(body);
        self.route(path, Script::Body { chunks, delay });
        self.size(path, body.len() as u64);
    }

    /// Serve `body` but fail its size probe
    pub(crate) fn unsized_body(&self, path: &str, body: &[u8]) {
        let chunks = chunked(body);
        self.route(
            path,
            Script::Body {
                chunks,
                delay: Duration::ZERO,
            },
        );
    }

    pub(crate) fn status(&self, path: &str, status: u16) {
        self.route(path, Script::Status(status));
    }

    pub(crate) fn network_error(&self, path: &str) {
        self.route(path, Script::NetworkError);
    }

    pub(crate) fn hang(&self, path: &str) {
        self.route(path, Script::Hang);
    }

    pub(crate) fn stall(&self, path: &str, first_chunk: &[u8]) {
        self.route(path, Script::Stall(Bytes::copy_from_slice(first_chunk)));
    }

    /// Advertise a content length for HEAD
    pub(crate) fn size(&self, path: &str, length: u64) {
        self.sizes.lock().unwrap().insert(url(path), length);
    }

    /// Hold every HEAD until the returned token is cancelled
    pub(crate) fn gate_probes(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        *self.probe_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn gets_started(&self) -> usize {
        self.gets_started.load(Ordering::SeqCst)
    }

    pub(crate) fn heads_started(&self) -> usize {
        self.heads_started.load(Ordering::SeqCst)
    }
}

fn chunked(body: &[u8]) -> Vec<Bytes> {
    body.chunks(64).map(Bytes::copy_from_slice).collect()
}

struct FakeBody {
    chunks: VecDeque<Bytes>,
    delay: Duration,
    stall_when_empty: bool,
}

#[async_trait::async_trait]
impl ResponseBody for FakeBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.stall_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<Box<dyn ResponseBody>, DownloadError> {
        self.gets_started.fetch_add(1, Ordering::SeqCst);
        let script = self.routes.lock().unwrap().get(url).cloned();

        match script {
            Some(Script::Body { chunks, delay }) => Ok(Box::new(FakeBody {
                chunks: chunks.into(),
                delay,
                stall_when_empty: false,
            })),
            Some(Script::Stall(first)) => Ok(Box::new(FakeBody {
                chunks: VecDeque::from([first]),
                delay: Duration::ZERO,
                stall_when_empty: true,
            })),
            Some(Script::Status(status)) => Err(DownloadError::BadResponse {
                url: url.to_string(),
                status,
            }),
            Some(Script::NetworkError) => Err(DownloadError::NetworkFailure {
                url: url.to_string(),
                reason: "connection reset by peer".to_string(),
            }),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(DownloadError::BadResponse {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn content_length(&self, url: &str) -> Result<u64, DownloadError> {
        self.heads_started.fetch_add(1, Ordering::SeqCst);
        let gate = self.probe_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }

        self.sizes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .ok_or_else(|| DownloadError::ProbeFailure {
                url: url.to_string(),
                reason: "no Content-Length".to_string(),
            })
    }
}

/// Config rooted in a fresh temp dir with a fast ticker and short keep-alive
pub(crate) fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.output_dir = temp_dir.path().join("downloads");
    config.progress.interval = Duration::from_millis(5);
    config.pool.keep_alive = Duration::from_millis(200);
    config
}

/// Create a downloader over `transport`. Returns the tempdir, which must be kept alive.
pub(crate) async fn create_test_downloader(
    transport: Arc<FakeTransport>,
) -> (BatchDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = BatchDownloader::builder(test_config(&temp_dir))
        .transport(transport)
        .build()
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// Receive events until a terminal one arrives (panics after 10s)
pub(crate) async fn collect_until_terminal(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("no terminal event within 10s");
    events
}

/// Wait for the first event of `kind`, returning everything received so far
pub(crate) async fn collect_until(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
) -> Vec<Event> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let found = event.kind() == kind;
                    events.push(event);
                    if found {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event within 10s"));
    events
}

pub(crate) fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Poll `condition` every 5ms, panicking after 5s
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub(crate) fn staging_entries(downloader: &BatchDownloader) -> usize {
    std::fs::read_dir(downloader.staging_dir()).unwrap().count()
}
