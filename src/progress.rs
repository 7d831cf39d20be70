//! Shared batch progress counters
//!
//! Each field is its own atomic. They are read together only to build a
//! [`ProgressSnapshot`] for reporting, never to make control decisions, so a
//! snapshot may mix values from slightly different instants.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::types::ProgressSnapshot;

/// Process-lifetime progress counters, reset between batches
#[derive(Debug, Default)]
pub struct ProgressState {
    bytes_downloaded: AtomicU64,
    total_expected_bytes: AtomicU64,
    error_count: AtomicU32,
    size_probe_complete: AtomicBool,
}

impl ProgressState {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes written to the staging area
    pub fn add_downloaded(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add a probed content length to the expected total
    pub fn add_expected(&self, bytes: u64) {
        self.total_expected_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one failed download task, returning the new error count
    pub fn record_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Flag that the size-probe pool has drained at least once this batch
    pub fn mark_size_probe_complete(&self) {
        self.size_probe_complete.store(true, Ordering::Release);
    }

    /// Whether expected totals are meaningful yet
    pub fn size_probe_complete(&self) -> bool {
        self.size_probe_complete.load(Ordering::Acquire)
    }

    /// Bytes downloaded so far
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    /// Expected total bytes so far
    pub fn total_expected_bytes(&self) -> u64 {
        self.total_expected_bytes.load(Ordering::Relaxed)
    }

    /// Failed download tasks so far
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Read all counters into a snapshot
    pub fn snapshot(&self, files_remaining: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_downloaded: self.bytes_downloaded(),
            total_expected_bytes: self.total_expected_bytes(),
            error_count: self.error_count(),
            files_remaining,
        }
    }

    /// Zero every counter
    ///
    /// Only called by the coordinator once both pools are idle, so no worker
    /// can race an increment against it within the same batch.
    pub fn reset(&self) {
        self.size_probe_complete.store(false, Ordering::Release);
        self.error_count.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.total_expected_bytes.store(0, Ordering::Relaxed);
    }

    /// True when every counter is at its reset value
    pub fn is_zero(&self) -> bool {
        self.bytes_downloaded() == 0
            && self.total_expected_bytes() == 0
            && self.error_count() == 0
            && !self.size_probe_complete()
    }
}
