//! Common test utilities for batch-dl integration tests

use std::time::Duration;

use batch_dl::{BatchDownloader, Config, Event, EventKind};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Result of waiting for a batch to end
#[derive(Debug)]
pub enum WaitResult {
    /// Batch ended; every event received, terminal one last
    Finished(Vec<Event>),
    /// Timeout waiting for a terminal event
    Timeout(Vec<Event>),
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Config rooted in `temp_dir` with a fast ticker and short timeouts
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.output_dir = temp_dir.path().join("downloads");
    config.progress.interval = Duration::from_millis(10);
    config.pool.keep_alive = Duration::from_millis(500);
    config.http.connect_timeout = Duration::from_secs(2);
    config
}

/// Create a downloader using the real HTTP transport
pub async fn create_downloader() -> (BatchDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let downloader = BatchDownloader::new(test_config(&temp_dir))
        .await
        .expect("Failed to create downloader");
    (downloader, temp_dir)
}

/// Collect events until `Complete` or `Cancelled`
pub async fn wait_for_batch_end(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
) -> WaitResult {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    seen.push(event);
                    if terminal {
                        return true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await;

    match result {
        Ok(true) => WaitResult::Finished(seen),
        Ok(false) => WaitResult::ChannelClosed,
        Err(_) => WaitResult::Timeout(seen),
    }
}

/// Unwrap a finished batch or fail the test with what was seen
pub fn expect_finished(result: WaitResult) -> Vec<Event> {
    match result {
        WaitResult::Finished(events) => events,
        other => panic!("batch did not finish: {:?}", other),
    }
}

/// Number of events of `kind`
pub fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Entries left in a directory (0 when it does not exist)
pub fn dir_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
