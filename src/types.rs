//! Core types for batch-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One resource to download
///
/// Immutable once built. The URL is validated at construction so a task never
/// starts with an empty or malformed address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RequestRepr")]
pub struct Request {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<PathBuf>,
}

impl Request {
    /// Create a request for an absolute `http` or `https` URL
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_dl::Request;
    ///
    /// let request = Request::new("https://example.com/files/report.pdf")
    ///     .unwrap()
    ///     .with_filename("q3-report");
    /// assert_eq!(request.filename(), Some("q3-report"));
    /// assert!(Request::new("").is_err());
    /// ```
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRequest("URL is empty".to_string()));
        }

        let parsed = url::Url::parse(trimmed)
            .map_err(|e| Error::InvalidRequest(format!("malformed URL '{}': {}", trimmed, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidRequest(format!(
                "unsupported URL scheme '{}' in '{}'",
                parsed.scheme(),
                trimmed
            )));
        }

        Ok(Self {
            url: trimmed.to_string(),
            filename: None,
            destination: None,
        })
    }

    /// Replace the downloaded file's base name (the original extension is kept)
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Move the finished file into `dir` instead of the configured output directory
    #[must_use]
    pub fn with_destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(dir.into());
        self
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Base-name override, if any
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Destination directory override, if any
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }
}

/// Wire form of [`Request`]; deserialization goes through [`Request::new`]
#[derive(Deserialize)]
struct RequestRepr {
    url: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    destination: Option<PathBuf>,
}

impl TryFrom<RequestRepr> for Request {
    type Error = Error;

    fn try_from(repr: RequestRepr) -> Result<Self> {
        let mut request = Request::new(repr.url)?;
        request.filename = repr.filename;
        request.destination = repr.destination;
        Ok(request)
    }
}

/// Point-in-time view of batch progress carried by every event
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Bytes written to the staging area so far in this batch
    pub bytes_downloaded: u64,
    /// Sum of the sizes reported by the size probes so far
    pub total_expected_bytes: u64,
    /// Number of failed download tasks in this batch
    pub error_count: u32,
    /// Download tasks still queued or running
    pub files_remaining: usize,
}

impl ProgressSnapshot {
    /// Integer completion percentage, `None` while the expected total is unknown
    ///
    /// Clamped to 100 since probes are advisory and servers may under-report.
    pub fn percent(&self) -> Option<u8> {
        if self.total_expected_bytes == 0 {
            return None;
        }
        let percent = self.bytes_downloaded.saturating_mul(100) / self.total_expected_bytes;
        Some(percent.min(100) as u8)
    }
}

/// Lifecycle and progress notifications published to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A batch just started; sizes are not known yet
    Calculating {
        /// Progress at emission time
        progress: ProgressSnapshot,
    },

    /// Periodic snapshot while the batch runs
    Progress {
        /// Progress at emission time
        progress: ProgressSnapshot,
    },

    /// One file finished and was moved to its destination
    FileDownloaded {
        /// Progress at emission time
        progress: ProgressSnapshot,
        /// Final file name
        filename: String,
        /// Absolute path of the final file
        filepath: PathBuf,
    },

    /// One download task failed
    Error {
        /// Progress at emission time (error count already includes this failure)
        progress: ProgressSnapshot,
        /// URL of the failed request
        failing_url: String,
    },

    /// The batch drained normally; state has been reset
    Complete {
        /// Final progress of the batch, `files_remaining` is always 0
        progress: ProgressSnapshot,
    },

    /// The batch was cancelled and drained; state has been reset
    Cancelled {
        /// Progress at the moment the pools finished draining
        progress: ProgressSnapshot,
    },
}

impl Event {
    /// Progress snapshot carried by this event
    pub fn progress(&self) -> &ProgressSnapshot {
        match self {
            Event::Calculating { progress }
            | Event::Progress { progress }
            | Event::FileDownloaded { progress, .. }
            | Event::Error { progress, .. }
            | Event::Complete { progress }
            | Event::Cancelled { progress } => progress,
        }
    }

    /// Discriminant without payload
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Calculating { .. } => EventKind::Calculating,
            Event::Progress { .. } => EventKind::Progress,
            Event::FileDownloaded { .. } => EventKind::FileDownloaded,
            Event::Error { .. } => EventKind::Error,
            Event::Complete { .. } => EventKind::Complete,
            Event::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    /// Whether this event ends a batch
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete { .. } | Event::Cancelled { .. })
    }
}

/// Payload-free event discriminant, handy for filtering and counting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`Event::Calculating`]
    Calculating,
    /// See [`Event::Progress`]
    Progress,
    /// See [`Event::FileDownloaded`]
    FileDownloaded,
    /// See [`Event::Error`]
    Error,
    /// See [`Event::Complete`]
    Complete,
    /// See [`Event::Cancelled`]
    Cancelled,
}

impl EventKind {
    /// Stable wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Calculating => "calculating",
            EventKind::Progress => "progress",
            EventKind::FileDownloaded => "file_downloaded",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
            EventKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch lifecycle phase as seen by the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    /// No batch in flight
    Idle,
    /// Requests are being probed and downloaded
    Running,
    /// `cancel()` was called; waiting for both pools to drain
    Cancelling,
}
