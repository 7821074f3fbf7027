//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the coordinator and executor.
///
/// Every duration is written as integer milliseconds when loaded from JSON:
///
/// ```json
/// { "batch_size": 50, "request_timeout": 10000, "max_operation_age": null }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Operations read from the log per page.
    pub batch_size: usize,
    /// Per-operation retry and backoff policy.
    pub retry: RetryConfig,
    /// Retry policy for operation log writes.
    pub storage_retry: RetryConfig,
    /// Upper bound on a single delivery.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Wall-clock budget for one run.
    #[serde(with = "millis")]
    pub run_budget: Duration,
    /// How long Success or Error stays visible before reverting to Idle.
    #[serde(with = "millis")]
    pub display_window: Duration,
    /// Period of the automatic sync timer.
    #[serde(with = "millis")]
    pub sync_interval: Duration,
    /// Number of history entries kept.
    pub history_capacity: usize,
    /// Operations older than this are dead-lettered without delivery.
    #[serde(with = "option_millis")]
    pub max_operation_age: Option<Duration>,
    /// Whether enqueueing through the coordinator triggers a sync.
    pub sync_on_enqueue: bool,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_size: 25,
            retry: RetryConfig::default(),
            storage_retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(50))
                .with_max_delay(Duration::from_secs(1)),
            request_timeout: Duration::from_secs(30),
            run_budget: Duration::from_secs(60),
            display_window: Duration::from_secs(3),
            sync_interval: Duration::from_secs(30),
            history_capacity: 20,
            max_operation_age: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            sync_on_enqueue: true,
        }
    }

    /// Sets the page size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the per-operation retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the storage retry policy.
    pub fn with_storage_retry(mut self, retry: RetryConfig) -> Self {
        self.storage_retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the run budget.
    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    /// Sets the display window.
    pub fn with_display_window(mut self, window: Duration) -> Self {
        self.display_window = window;
        self
    }

    /// Sets the automatic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the history capacity.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the maximum operation age; `None` disables expiry.
    pub fn with_max_operation_age(mut self, age: Option<Duration>) -> Self {
        self.max_operation_age = age;
        self
    }

    /// Sets whether enqueueing triggers a sync.
    pub fn with_sync_on_enqueue(mut self, value: bool) -> Self {
        self.sync_on_enqueue = value;
        self
    }

    /// Checks that the configuration can drive a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.storage_retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "storage_retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "history_capacity must be at least 1".into(),
            ));
        }
        if self.sync_interval.is_zero() {
            return Err(SyncError::InvalidConfig("sync_interval must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay after the first failure.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
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

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay after `attempt` failures (0 means no delay).
    ///
    /// The delay is `min(max_delay, initial_delay * multiplier^(attempt - 1))`,
    /// plus jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
