//! Batch download engine split into focused submodules.
//!
//! The `BatchDownloader` handle and its internals are organized by role:
//! - [`coordinator`] - Serial batch state machine (start, complete, cancel, reset)
//! - [`download_task`] - GET, staging write and relocation of one request
//! - [`probe_task`] - HEAD size probe of one request
//! - [`ticker`] - Periodic progress emission while a batch runs

mod coordinator;
mod download_task;
mod probe_task;
mod ticker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::{HttpTransport, Transport};
use crate::pool::WorkerPool;
use crate::progress::ProgressState;
use crate::sink::{EventHub, EventSink};
use crate::types::{BatchPhase, Event, ProgressSnapshot, Request};
use crate::utils;

use coordinator::{Command, Coordinator};
use download_task::DownloadJob;
use probe_task::ProbeJob;

/// The two pools of one generation
#[derive(Clone)]
pub(crate) struct Pools {
    pub(crate) downloads: Arc<WorkerPool<DownloadJob>>,
    pub(crate) probes: Arc<WorkerPool<ProbeJob>>,
}

/// State shared by the handle, the coordinator, the ticker and every job
pub(crate) struct Shared {
    pub(crate) config: Arc<Config>,
    /// Effective staging directory (created at construction)
    pub(crate) staging_dir: PathBuf,
    pub(crate) progress: ProgressState,
    pub(crate) events: EventHub,
    pub(crate) transport: Arc<dyn Transport>,
    /// Current pool generation; swapped by the coordinator on cancel
    pools: RwLock<Pools>,
    /// Download pool being shut down by a cancel, until it has terminated
    retiring: Mutex<Option<Arc<WorkerPool<DownloadJob>>>>,
    phase: Mutex<BatchPhase>,
    /// Sequence used to give every staged file a unique name
    next_task_id: AtomicU64,
    /// Set once `shutdown()` has been called
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn pools(&self) -> Pools {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new pool generation, returning the previous one
    pub(crate) fn replace_pools(&self, pools: Pools) -> Pools {
        let mut guard = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, pools)
    }

    pub(crate) fn set_retiring(&self, pool: Option<Arc<WorkerPool<DownloadJob>>>) {
        *self.retiring.lock().unwrap_or_else(PoisonError::into_inner) = pool;
    }

    /// Download tasks still executing, including those of a pool being retired
    pub(crate) fn active_downloads(&self) -> usize {
        let retiring = self
            .retiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |pool| pool.active());
        self.pools().downloads.active() + retiring
    }

    pub(crate) fn phase(&self) -> BatchPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_phase(&self, phase: BatchPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Queued plus running download tasks of the current generation
    pub(crate) fn files_remaining(&self) -> usize {
        self.pools().downloads.pending()
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, event: Event) {
        self.events.publish(event);
    }
}

/// Concurrent batch downloader (cloneable - all clones drive the same engine)
///
/// Requests are dispatched to a download pool and a size-probe pool; progress
/// and lifecycle changes are reported as [`Event`]s. Dropping every clone stops
/// the engine and cancels whatever is still running.
#[derive(Clone)]
pub struct BatchDownloader {
    pub(crate) shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

/// Builder for [`BatchDownloader`] with pluggable transport and event sink
pub struct BatchDownloaderBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl BatchDownloaderBuilder {
    /// Use a custom [`Transport`] instead of the reqwest-backed [`HttpTransport`]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Forward every event to `sink` in addition to the broadcast channel
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration, prepare directories and start the engine
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unusable settings, [`Error::Io`] when the
    /// output or staging directory cannot be created, and [`Error::Other`] if
    /// the HTTP client cannot be built.
    pub async fn build(self) -> Result<BatchDownloader> {
        let config = self.config;
        config.validate()?;

        utils::ensure_directory(config.output_dir(), "output directory").await?;
        let staging_dir = config.staging_dir();
        utils::ensure_directory(&staging_dir, "staging directory").await?;

        // Leftovers from a previous process are never resumable
        let stale = utils::clear_directory(&staging_dir).await?;
        if stale > 0 {
            tracing::info!(
                staging_dir = %staging_dir.display(),
                removed = stale,
                "cleared stale staging files"
            );
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.http)?),
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let weak = commands.downgrade();
        let pools = coordinator::build_pools(&config.pool, 0, &weak);

        let shared = Arc::new(Shared {
            events: EventHub::new(config.event_buffer, self.sink),
            config: Arc::new(config),
            staging_dir,
            progress: ProgressState::new(),
            transport,
            pools: RwLock::new(pools),
            retiring: Mutex::new(None),
            phase: Mutex::new(BatchPhase::Idle),
            next_task_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Coordinator::new(Arc::clone(&shared), receiver, weak).run());

        tracing::info!(
            output_dir = %shared.config.output_dir().display(),
            staging_dir = %shared.staging_dir.display(),
            core_workers = shared.config.pool.core_workers,
            max_workers = shared.config.pool.max_workers,
            "batch downloader ready"
        );

        Ok(BatchDownloader { shared, commands })
    }
}

impl BatchDownloader {
    /// Create a downloader with the default HTTP transport
    ///
    /// Creates the output and staging directories, clears stale staging files
    /// and starts the coordinator task.
    pub async fn new(config: Config) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Start building a downloader with a custom transport or event sink
    pub fn builder(config: Config) -> BatchDownloaderBuilder {
        BatchDownloaderBuilder {
            config,
            transport: None,
            sink: None,
        }
    }

    /// Subscribe to engine events
    ///
    /// Subscribers only see events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Queue one request
    ///
    /// Starts a new batch (emitting `Calculating`) when the engine is idle,
    /// otherwise joins the running batch. Failures surface only as events.
    pub fn submit(&self, request: Request) {
        self.submit_all([request]);
    }

    /// Queue several requests as one submission
    pub fn submit_all(&self, requests: impl IntoIterator<Item = Request>) {
        if self.shared.closed.load(Ordering::Acquire) {
            tracing::warn!("submit after shutdown ignored");
            return;
        }

        let requests: Vec<Request> = requests.into_iter().collect();
        if requests.is_empty() {
            return;
        }

        if self.commands.send(Command::Submit(requests)).is_err() {
            tracing::warn!("coordinator stopped, submission dropped");
        }
    }

    /// Interrupt every queued and running task
    ///
    /// Returns immediately. Once both pools have drained the engine resets and
    /// publishes exactly one `Cancelled` event. A no-op while idle.
    pub fn cancel(&self) {
        // A stopped coordinator has nothing left to cancel
        self.commands.send(Command::Cancel).ok();
    }

    /// Whether any download task is currently executing
    ///
    /// While a cancel is in progress this keeps reporting `true` until the
    /// cancelled tasks have actually stopped.
    pub fn is_running(&self) -> bool {
        self.shared.active_downloads() > 0
    }

    /// Current batch phase
    pub fn phase(&self) -> BatchPhase {
        self.shared.phase()
    }

    /// Snapshot of the shared progress counters
    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot(self.files_remaining())
    }

    /// Queued plus running download tasks
    pub fn files_remaining(&self) -> usize {
        self.shared.files_remaining()
    }

    /// Directory holding in-flight downloads
    pub fn staging_dir(&self) -> &Path {
        &self.shared.staging_dir
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.shared.config)
    }

    /// Cancel everything, wait for both pools to terminate and stop the engine
    ///
    /// A running batch still ends with a `Cancelled` event. Later submissions
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if shutdown was already requested.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ShuttingDown);
        }
        tracing::info!("shutting down batch downloader");

        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).is_err() {
            return Ok(());
        }
        // The coordinator drops the reply sender only if it panicked
        done.await.ok();

        tracing::info!("batch downloader stopped");
        Ok(())
    }

    /// Wait for `trigger` to resolve, then [`shutdown`](Self::shutdown)
    ///
    /// `trigger` is typically a termination signal (see
    /// [`run_with_shutdown`](crate::run_with_shutdown)), but any future works,
    /// e.g. a oneshot fired by the host when it stops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the engine was already shut down
    /// when `trigger` fired.
    pub async fn shutdown_on(&self, trigger: impl Future<Output = ()>) -> Result<()> {
        trigger.await;
        tracing::info!(
            phase = ?self.phase(),
            files_remaining = self.files_remaining(),
            "shutdown triggered"
        );
        self.shutdown().await
    }
}
