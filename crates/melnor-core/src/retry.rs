//! Retry logic for establishing the BLE link.
//!
//! Only link establishment is retried. Reads and writes on a live link are
//! attempted once: a failed write is reported to the caller, and a failed
//! read simply leaves that record stale until the next fetch.
//!
//! # Example
//!
//! ```
//! use melnor_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::for_connect();
//!
//! let result = with_retry(&config, "connect", || async {
//!     Ok::<_, Error>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ConnectionFailureReason, Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff with `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Link establishment: four attempts in total, patient backoff for a
    /// timer that may be waking from its low-power advertising cycle.
    pub fn for_connect() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Three attempts, short fixed steps, no jitter. For a timer that is
    /// known to be close by.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            jitter: false,
            ..Default::default()
        }
    }

    /// Set the number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the pause after the first failure.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap the pause between attempts.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Total number of attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause after the failed attempt number `attempt` (0-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let steps = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(steps))
            .min(self.max_delay.as_secs_f64());

        // Stretch by up to a quarter so retries from several sessions spread out.
        let scale = if self.jitter {
            1.0 + rand::rng().random_range(0.0..0.25)
        } else {
            1.0
        };
        Duration::from_secs_f64(secs * scale)
    }
}

/// Run `operation` until it succeeds, fails with an error that another
/// attempt cannot fix, or runs out of attempts.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.attempts();
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}/{}", label, attempt + 1, attempts);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt + 1 >= attempts || !is_retryable(&error) {
            return Err(error);
        }

        let pause = config.backoff(attempt);
        warn!(
            "{} failed (attempt {}/{}): {}, retrying in {:?}",
            label,
            attempt + 1,
            attempts,
            error,
            pause
        );
        sleep(pause).await;
        attempt += 1;
    }
}

/// Failures that a fresh link attempt may get past.
fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Timeout { .. } | Error::Bluetooth(_) | Error::NotConnected | Error::Io(_) => true,
        Error::ConnectionFailed { reason, .. } => !matches!(
            reason,
            ConnectionFailureReason::AdapterUnavailable
                | ConnectionFailureReason::HandshakeFailed(_)
        ),
        _ => false,
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
