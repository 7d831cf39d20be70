//! Error types for batch-dl
//!
//! Two layers:
//! - [`Error`] is returned by the few fallible public calls (construction,
//!   request validation, configuration checks).
//! - [`DownloadError`] describes why a single task failed. Task failures never
//!   propagate to the caller; they are turned into [`Event::Error`](crate::Event::Error)
//!   plus an error-count increment at the task boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for batch-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batch-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pool.max_workers")
        key: Option<String>,
    },

    /// A request could not be constructed (empty or malformed URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Download task failure
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The downloader has been shut down and no longer accepts work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Why a single download or size-probe task failed
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connecting to the server or reading the body failed
    #[error("network failure for {url}: {reason}")]
    NetworkFailure {
        /// URL being fetched
        url: String,
        /// Underlying transport error message
        reason: String,
    },

    /// Server answered the GET with a non-success status
    #[error("bad response from {url}: HTTP {status}")]
    BadResponse {
        /// URL being fetched
        url: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// Configured destination does not exist or is not a directory
    #[error("destination {path} does not exist or is not a directory")]
    MissingOrInvalidDestination {
        /// The destination directory from the request
        path: PathBuf,
    },

    /// Staged file could not be moved (or copied) into its destination
    #[error("failed to move {from} to {to}: {reason}")]
    RelocationFailure {
        /// Staged file path
        from: PathBuf,
        /// Final destination path
        to: PathBuf,
        /// Underlying I/O error message
        reason: String,
    },

    /// Writing into the staging area failed
    #[error("failed to write staging file {path}: {reason}")]
    Staging {
        /// Staging file path
        path: PathBuf,
        /// Underlying I/O error message
        reason: String,
    },

    /// Size probe failed or returned no usable length (advisory only)
    #[error("size probe failed for {url}: {reason}")]
    ProbeFailure {
        /// URL being probed
        url: String,
        /// Why no length could be determined
        reason: String,
    },
}

impl DownloadError {
    /// Build a [`DownloadError::NetworkFailure`] from a reqwest error
    pub(crate) fn network(url: &str, err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        DownloadError::NetworkFailure {
            url: url.to_string(),
            reason,
        }
    }

    /// Short machine-readable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::NetworkFailure { .. } => "network_failure",
            DownloadError::BadResponse { .. } => "bad_response",
            DownloadError::MissingOrInvalidDestination { .. } => "invalid_destination",
            DownloadError::RelocationFailure { .. } => "relocation_failure",
            DownloadError::Staging { .. } => "staging_failure",
            DownloadError::ProbeFailure { .. } => "probe_failure",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_response_message_includes_status_and_url() {
        let err = DownloadError::BadResponse {
            url: "http://example.com/a.bin".to_string(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "bad response from http://example.com/a.bin: HTTP 404"
        );
        assert_eq!(err.code(), "bad_response");
    }

    #[test]
    fn download_error_converts_into_crate_error() {
        let err: Error = DownloadError::MissingOrInvalidDestination {
            path: PathBuf::from("/nope"),
        }
        .into();
        assert!(matches!(
            err,
            Error::Download(DownloadError::MissingOrInvalidDestination { .. })
        ));
        assert!(err.to_string().starts_with("download error: destination /nope"));
    }

    #[test]
    fn config_error_display_uses_message() {
        let err = Error::Config {
            message: "max_workers must be >= core_workers".to_string(),
            key: Some("pool.max_workers".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "configuration error: max_workers must be >= core_workers"
        );
    }
}
