//! Configuration for the sync engine.

use std::time::Duration;
use thiserror::Error;

/// Default number of events requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of the device being synced, used in logs.
    pub device_id: String,
    /// Maximum number of events requested per page.
    pub page_size: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Time bounds for device-facing calls.
    pub timeouts: DeviceTimeouts,
}

impl SyncConfig {
    /// Creates a new sync configuration with default paging, retry and timeouts.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
            timeouts: DeviceTimeouts::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the device timeouts.
    pub fn with_timeouts(mut self, timeouts: DeviceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Checks that the configuration can drive a sync.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero page size, a zero attempt budget or a
    /// backoff multiplier below `1.0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(multiplier));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry behavior.
///
/// The wait after failed attempt `n` (0-indexed) is
/// `min(initial_delay * backoff_multiplier^n, max_delay)`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the wait after the failed attempt with the given index (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Time bounds for each device-facing call.
#[derive(Debug, Clone)]
pub struct DeviceTimeouts {
    /// Bonding.
    pub bond: Duration,
    /// Establishing a connection.
    pub connect: Duration,
    /// Reading the event count or a page.
    pub read: Duration,
    /// Acknowledging a page.
    pub acknowledge: Duration,
    /// Best-effort disconnect.
    pub release: Duration,
}

impl DeviceTimeouts {
    /// Sets the read timeout.
    pub fn with_read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }

    /// Sets the acknowledge timeout.
    pub fn with_acknowledge(mut self, timeout: Duration) -> Self {
        self.acknowledge = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    /// Sets the bond timeout.
    pub fn with_bond(mut self, timeout: Duration) -> Self {
        self.bond = timeout;
        self
    }
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self {
            bond: Duration::from_secs(60),
            connect: Duration::from_secs(30),
            read: Duration::from_secs(5),
            acknowledge: Duration::from_secs(3),
            release: Duration::from_secs(5),
        }
    }
}

/// A configuration that cannot drive a sync.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Page size is zero.
    #[error("page size must be at least 1")]
    ZeroPageSize,

    /// Attempt budget is zero.
    #[error("retry budget must allow at least 1 attempt")]
    ZeroAttempts,

    /// Backoff would shrink or is not a number.
    #[error("backoff multiplier must be at least 1.0, got {0}")]
    InvalidMultiplier(f64),
}
