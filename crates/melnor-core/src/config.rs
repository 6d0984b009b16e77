//! Connection and sync configuration.
//!
//! [`ConnectionConfig`] holds BLE timeouts and the link retry policy.
//! [`SyncConfig`] adds the local timezone and the poll interval and can be
//! loaded from TOML:
//!
//! ```toml
//! timezone = "America/Detroit"
//! poll_interval = 60000
//!
//! [connection]
//! connection_timeout = 20000
//!
//! [connection.retry]
//! max_retries = 1
//! ```
//!
//! Durations are given in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::{RetryConfig, duration_millis};
use crate::timestamp::TimestampCodec;

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between background fetches.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Zone used when neither the config nor `TZ` names one.
const FALLBACK_TIMEZONE: &str = "UTC";

/// Configuration for BLE connection timeouts and behavior.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use melnor_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .read_timeout(Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,
    /// Timeout for BLE read operations.
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    #[serde(with = "duration_millis")]
    pub write_timeout: Duration,
    /// Timeout for service discovery after connection.
    #[serde(with = "duration_millis")]
    pub discovery_timeout: Duration,
    /// Retry policy for link establishment.
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            retry: RetryConfig::for_connect(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Longer timeouts for weak signals, e.g. a timer at the far end of a yard.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(25),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(15),
            retry: RetryConfig::for_connect().max_retries(5),
        }
    }

    /// Shorter timeouts for quicker failure detection.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
            retry: RetryConfig::quick(),
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the link retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject zero timeouts.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connection_timeout", self.connection_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("discovery_timeout", self.discovery_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Everything a sync session needs besides the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// IANA zone of the controller, e.g. `"Europe/Berlin"`.
    pub timezone: Option<String>,
    /// BLE timeouts and retries.
    pub connection: ConnectionConfig,
    /// Interval for [`StatePoller`](crate::StatePoller).
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            connection: ConnectionConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading sync config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_config(format!("failed to serialize config: {e}")))
    }

    /// Check the poll interval and the connection timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be non-zero"));
        }
        self.connection.validate()
    }

    /// Set the timezone.
    #[must_use]
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The zone name in effect: the configured one, then `TZ`, then UTC.
    pub fn timezone_name(&self) -> String {
        resolve_timezone(self.timezone.as_deref(), std::env::var("TZ").ok())
    }

    /// A timestamp codec for [`timezone_name`](Self::timezone_name).
    pub fn codec(&self) -> TimestampCodec {
        TimestampCodec::from_name(&self.timezone_name())
    }
}

fn resolve_timezone(configured: Option<&str>, env: Option<String>) -> String {
    configured
        .map(str::to_string)
        .or_else(|| env.map(|tz| tz.trim_start_matches(':').to_string()))
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| FALLBACK_TIMEZONE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.connection.connection_timeout, Duration::from_secs(15));
        assert_eq!(config.connection.retry.attempts(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = SyncConfig::from_toml_str(
            r#"
            timezone = "America/Detroit"
            poll_interval = 30000

            [connection]
            read_timeout = 2500

            [connection.retry]
            max_retries = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.timezone.as_deref(), Some("America/Detroit"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.connection.read_timeout, Duration::from_millis(2500));
        assert_eq!(config.connection.write_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.retry.max_retries, 1);
        assert_eq!(config.timezone_name(), "America/Detroit");
        assert!(!config.codec().is_degraded());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SyncConfig::from_toml_str("poll_interval = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = SyncConfig::from_toml_str("[connection]\nread_timeout = 0").unwrap_err();
        assert!(err.to_string().contains("read_timeout"));

        let err = SyncConfig::from_toml_str("timezone = 5").unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SyncConfig::default()
            .timezone("Europe/Berlin")
            .poll_interval(Duration::from_secs(5));
        let text = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = SyncConfig::load("/nonexistent/melnor/sync.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_timezone_resolution_order() {
        assert_eq!(
            resolve_timezone(Some("Asia/Tokyo"), Some("Europe/Paris".into())),
            "Asia/Tokyo"
        );
        assert_eq!(
            resolve_timezone(None, Some(":America/Chicago".into())),
            "America/Chicago"
        );
        assert_eq!(resolve_timezone(None, None), "UTC");
        assert_eq!(resolve_timezone(None, Some(String::new())), "UTC");
    }

    #[test]
    fn test_connection_presets() {
        assert!(ConnectionConfig::fast().read_timeout < ConnectionConfig::default().read_timeout);
        assert!(
            ConnectionConfig::challenging_environment().connection_timeout
                > ConnectionConfig::default().connection_timeout
        );
        let config = ConnectionConfig::new().write_timeout(Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(3));
    }
}
