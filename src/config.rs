//! Configuration types for batch-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Name of the staging directory created under the output directory when
/// no explicit staging directory is configured
pub const DEFAULT_STAGING_DIR_NAME: &str = ".staging";

/// Download behavior configuration (directories, buffering)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory used when a request has no destination (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Scratch directory for in-flight downloads (default: `<output_dir>/.staging`)
    ///
    /// Keep it on the same filesystem as the destinations when possible;
    /// relocation then is a plain rename instead of copy + delete.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Capacity of the buffered writer for staged files (default: 64 KiB)
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            staging_dir: None,
            write_buffer_size: default_write_buffer_size(),
        }
    }
}

/// Worker pool sizing, shared by the download and size-probe pools
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Workers spawned eagerly as work arrives (default: 4)
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Upper bound on live workers, including burst workers (default: 5)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long an idle worker waits for work before retiring (default: 10s)
    #[serde(default = "default_keep_alive", with = "duration_ms_serde")]
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// Progress reporting configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Interval between `Progress` events while a batch runs (default: 32ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: default_progress_interval(),
        }
    }
}

/// HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout (default: 30s)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout, including body streaming (default: none)
    #[serde(default, with = "optional_duration_ms_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration for [`BatchDownloader`](crate::BatchDownloader)
///
/// Every field has a sensible default, so `Config::default()` works out of
/// the box and partial JSON documents deserialize cleanly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directories and buffering
    #[serde(default)]
    pub download: DownloadConfig,

    /// Worker pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Progress ticker settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            pool: PoolConfig::default(),
            progress: ProgressConfig::default(),
            http: HttpConfig::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Config {
    /// Directory used for requests without an explicit destination
    pub fn output_dir(&self) -> &PathBuf {
        &self.download.output_dir
    }

    /// Effective staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.download
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join(DEFAULT_STAGING_DIR_NAME))
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.core_workers == 0 {
            return Err(config_error("core_workers must be at least 1", "pool.core_workers"));
        }
        if self.pool.max_workers < self.pool.core_workers {
            return Err(config_error(
                "max_workers must be >= core_workers",
                "pool.max_workers",
            ));
        }
        if self.progress.interval.is_zero() {
            return Err(config_error(
                "progress interval must be non-zero",
                "progress.interval",
            ));
        }
        if self.event_buffer == 0 {
            return Err(config_error("event_buffer must be at least 1", "event_buffer"));
        }
        if self.download.write_buffer_size == 0 {
            return Err(config_error(
                "write_buffer_size must be at least 1",
                "download.write_buffer_size",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_write_buffer_size() -> usize {
    64 * 1024
}

fn default_core_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    5
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(10)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(32)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("batch-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_event_buffer() -> usize {
    1000
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper (milliseconds)
mod optional_duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pool_and_ticker_cadence() {
        let config = Config::default();
        assert_eq!(config.pool.core_workers, 4);
        assert_eq!(config.pool.max_workers, 5);
        assert_eq!(config.pool.keep_alive, Duration::from_secs(10));
        assert_eq!(config.progress.interval, Duration::from_millis(32));
        assert_eq!(config.event_buffer, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn staging_dir_defaults_under_output_dir() {
        let mut config = Config::default();
        config.download.output_dir = PathBuf::from("/data/out");
        assert_eq!(config.staging_dir(), PathBuf::from("/data/out/.staging"));

        config.download.staging_dir = Some(PathBuf::from("/scratch"));
        assert_eq!(config.staging_dir(), PathBuf::from("/scratch"));
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(config.pool.core_workers, 4);
        assert_eq!(config.progress.interval, Duration::from_millis(32));
        assert!(config.http.request_timeout.is_none());
        assert!(config.http.user_agent.starts_with("batch-dl/"));
        assert_eq!(config.event_buffer, Config::default().event_buffer);
    }

    #[test]
    fn default_config_passes_validation() {
        let config = Config::default();
        assert_eq!(config.event_buffer, 1000);
        assert_eq!(config.download.write_buffer_size, 64 * 1024);
        config.validate().expect("default config must be usable");
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let json = r#"{"pool":{"keep_alive":1500},"progress":{"interval":100},"http":{"request_timeout":2000}}"#;
        let config: Config = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(config.pool.keep_alive, Duration::from_millis(1500));
        assert_eq!(config.progress.interval, Duration::from_millis(100));
        assert_eq!(config.http.request_timeout, Some(Duration::from_secs(2)));

        let value = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(value["pool"]["keep_alive"], 1500);
        assert_eq!(value["progress"]["interval"], 100);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.pool.core_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(ref k), .. }) if k == "pool.core_workers"
        ));

        let mut config = Config::default();
        config.pool.core_workers = 6;
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(ref k), .. }) if k == "pool.max_workers"
        ));

        let mut config = Config::default();
        config.progress.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.event_buffer = 0;
        assert!(config.validate().is_err());
    }
}
