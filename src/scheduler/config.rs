//! Run configuration for the dispatcher.
//!
//! Holds the flow-control knobs of a run: window size, per-request timeout,
//! retry budget, and reporting intervals.

use std::time::Duration;
use thiserror::Error;

/// Default number of requests kept in flight (matches the service's 50 threads).
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default attempt budget per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors that can occur while building or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Window size N: the number of requests kept outstanding.
    pub concurrency: usize,
    /// Deadline for each individual attempt, measured from submission.
    pub request_timeout: Duration,
    /// Total attempts allowed per item before it is marked failed.
    pub max_retries: u32,
    /// Pause before a failed item is put back on the backlog.
    pub retry_delay: Duration,
    /// How often progress is logged while the run is active.
    pub progress_interval: Duration,
    /// Trailing window used for the throughput estimate.
    pub throughput_window: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            progress_interval: Duration::from_secs(5),
            throughput_window: Duration::from_secs(60),
        }
    }
}

impl RunConfig {
    /// Creates a configuration with the given window size and defaults elsewhere.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `POINTFLOW_CONCURRENCY`: Window size (default: 50)
    /// - `POINTFLOW_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 15)
    /// - `POINTFLOW_MAX_RETRIES`: Attempt budget per item (default: 3)
    /// - `POINTFLOW_RETRY_DELAY_MS`: Pause before a retry is re-enqueued (default: 0)
    /// - `POINTFLOW_PROGRESS_INTERVAL_SECS`: Progress log interval (default: 5)
    /// - `POINTFLOW_THROUGHPUT_WINDOW_SECS`: Throughput window (default: 60)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("POINTFLOW_CONCURRENCY") {
            config.concurrency = parse_env_value(&val, "POINTFLOW_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("POINTFLOW_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "POINTFLOW_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("POINTFLOW_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "POINTFLOW_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("POINTFLOW_RETRY_DELAY_MS") {
            let millis: u64 = parse_env_value(&val, "POINTFLOW_RETRY_DELAY_MS")?;
            config.retry_delay = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("POINTFLOW_PROGRESS_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "POINTFLOW_PROGRESS_INTERVAL_SECS")?;
            config.progress_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("POINTFLOW_THROUGHPUT_WINDOW_SECS") {
            let secs: u64 = parse_env_value(&val, "POINTFLOW_THROUGHPUT_WINDOW_SECS")?;
            config.throughput_window = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        // The budget counts the first attempt too.
        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        if self.throughput_window.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "throughput_window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the window size.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the attempt budget.
    ///
    /// The budget counts the first attempt, so an item that never succeeds
    /// ends with exactly `max_retries` attempts. `0` allows no attempt at all
    /// and is rejected by [`RunConfig::validate`].
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the pause before retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the progress log interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the throughput window.
    pub fn with_throughput_window(mut self, window: Duration) -> Self {
        self.throughput_window = window;
        self
    }
}

fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
