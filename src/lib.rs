//! # batch-dl
//!
//! Concurrent batch download engine with aggregate progress reporting.
//!
//! ## Design Philosophy
//!
//! batch-dl is designed to be:
//! - **Fire-and-forget** - `submit` and `cancel` never block; results arrive as events
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! Every submitted [`Request`] becomes one download task and one size probe.
//! Both run on bounded worker pools; finished files are staged, then moved
//! into their destination. A batch ends with exactly one
//! [`Event::Complete`] or [`Event::Cancelled`], after which all counters are
//! zero and the staging directory is empty.
//!
//! ## Quick Start
//!
//! ```no_run
//! use batch_dl::{BatchDownloader, Config, Event, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = BatchDownloader::new(Config::default()).await?;
//!
//!     // Subscribe before submitting so no event is missed
//!     let mut events = downloader.subscribe();
//!
//!     downloader.submit_all([
//!         Request::new("https://example.com/files/a.zip")?,
//!         Request::new("https://example.com/files/b.zip")?.with_filename("second"),
//!     ]);
//!
//!     while let Ok(event) = events.recv().await {
//!         if let Some(percent) = event.progress().percent() {
//!             println!("{} ({}%)", event.kind(), percent);
//!         }
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch downloader: coordinator, tasks and progress ticker
pub mod downloader;
/// Error types
pub mod error;
/// HTTP transport boundary
pub mod http;
/// Worker pool shared by downloads and size probes
mod pool;
/// Shared progress counters
pub mod progress;
/// Event sinks
pub mod sink;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, PoolConfig, ProgressConfig};
pub use downloader::{BatchDownloader, BatchDownloaderBuilder};
pub use error::{DownloadError, Error, Result};
pub use http::{HttpTransport, ResponseBody, Transport};
pub use progress::ProgressState;
pub use sink::{EventSink, FnSink};
pub use types::{BatchPhase, Event, EventKind, ProgressSnapshot, Request};

/// Shut `downloader` down once the process is asked to terminate
///
/// Resolves after SIGTERM or SIGINT on Unix (Ctrl+C elsewhere) has been
/// received and the engine has stopped. A batch still running at that point
/// ends with [`Event::Cancelled`]. Hosts with their own stop condition can
/// use [`BatchDownloader::shutdown_on`] directly.
///
/// # Example
///
/// ```no_run
/// use batch_dl::{BatchDownloader, Config, Request, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = BatchDownloader::new(Config::default()).await?;
///     downloader.submit(Request::new("https://example.com/big.iso")?);
///
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: BatchDownloader) -> Result<()> {
    downloader.shutdown_on(termination_signal()).await
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments; use whatever is available
    let [term, int] = [SignalKind::terminate(), SignalKind::interrupt()].map(|kind| {
        signal(kind)
            .map_err(|e| tracing::warn!(?kind, error = %e, "signal handler unavailable"))
            .ok()
    });

    match (term, int) {
        (Some(mut term), Some(mut int)) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        }
        (Some(mut only), None) | (None, Some(mut only)) => {
            only.recv().await;
        }
        (None, None) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
    tracing::info!("termination signal received");
}

#[cfg(not(unix))]
async fn termination_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C, shutting down now");
        return;
    }
    tracing::info!("termination signal received");
}
