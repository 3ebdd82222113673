//! Configuration for the mirroring engine.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the object-storage bucket.
pub const ENV_BUCKET_NAME: &str = "BUCKET_NAME";
/// Environment variable overriding the mutation-count sync threshold.
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
/// Environment variable overriding the time-based sync interval (milliseconds).
pub const ENV_SYNC_INTERVAL_MS: &str = "SYNC_INTERVAL_MS";

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Object-storage bucket identifier.
    pub bucket: String,
    /// Fixed key of the database blob inside the bucket.
    pub remote_key: String,
    /// Fixed path of the database file on local (ephemeral) disk.
    pub local_path: PathBuf,
    /// Table probed to decide whether the database is structurally empty.
    pub canary_table: String,
    /// Number of tracked mutations that triggers an inline sync.
    pub batch_size: u64,
    /// Elapsed time since the last successful sync that triggers a sync.
    pub sync_interval: Duration,
    /// Size (bytes) at or below which a file is treated as an empty placeholder
    /// rather than a real database.
    pub min_viable_size: u64,
    /// Timeout applied to every individual remote call.
    pub request_timeout: Duration,
    /// Upper bound on the final flush during shutdown.
    pub shutdown_timeout: Duration,
    /// Retry behavior for remote calls.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration with the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bucket: "mirrorlite-data".into(),
            remote_key: "app.sqlite3".into(),
            local_path: std::env::temp_dir().join("mirrorlite").join("app.sqlite3"),
            canary_table: "entries".into(),
            batch_size: 10,
            sync_interval: Duration::from_millis(30_000),
            min_viable_size: 4096,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    /// Creates a configuration from defaults plus recognized environment
    /// variables (`BUCKET_NAME`, `BATCH_SIZE`, `SYNC_INTERVAL_MS`).
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(bucket) = std::env::var(ENV_BUCKET_NAME) {
            if !bucket.is_empty() {
                config.bucket = bucket;
            }
        }

        if let Ok(raw) = std::env::var(ENV_BATCH_SIZE) {
            match raw.parse::<u64>() {
                Ok(n) if n > 0 => config.batch_size = n,
                _ => warn!(value = %raw, "ignoring invalid {ENV_BATCH_SIZE}"),
            }
        }

        if let Ok(raw) = std::env::var(ENV_SYNC_INTERVAL_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.sync_interval = Duration::from_millis(ms),
                _ => warn!(value = %raw, "ignoring invalid {ENV_SYNC_INTERVAL_MS}"),
            }
        }

        config
    }

    /// Sets the bucket identifier.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Sets the remote blob key.
    #[must_use]
    pub fn with_remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = key.into();
        self
    }

    /// Sets the local database path.
    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = path.into();
        self
    }

    /// Sets the canary table name.
    #[must_use]
    pub fn with_canary_table(mut self, table: impl Into<String>) -> Self {
        self.canary_table = table.into();
        self
    }

    /// Sets the mutation-count sync threshold.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the time-based sync interval.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the minimum viable database size.
    #[must_use]
    pub fn with_min_viable_size(mut self, bytes: u64) -> Self {
        self.min_viable_size = bytes;
        self
    }

    /// Sets the per-request remote timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the shutdown flush bound.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior on remote calls.
///
/// Backoff is linear: the wait before attempt `n` is `initial_delay × n`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay multiplied by the attempt number.
    pub initial_delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
        }
    }

    /// Creates a configuration that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.initial_delay * attempt
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sync_interval, Duration::from_millis(30_000));
        assert_eq!(config.min_viable_size, 4096);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn config_builder() {
        let config = EngineConfig::new()
            .with_bucket("tracker-prod")
            .with_remote_key("tracker.sqlite3")
            .with_batch_size(5)
            .with_sync_interval(Duration::from_secs(5))
            .with_min_viable_size(8192);

        assert_eq!(config.bucket, "tracker-prod");
        assert_eq!(config.remote_key, "tracker.sqlite3");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.min_viable_size, 8192);
    }

    #[test]
    fn retry_delay_is_linear() {
        let retry = RetryConfig::new(3).with_initial_delay(Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(2));
    }

    #[test]
    fn retry_config_no_retry() {
        let retry = RetryConfig::no_retry();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.delay_for_attempt(1), Duration::ZERO);
    }

    // Environment overrides are checked in a single test because the
    // variables are process-global and tests run in parallel.
    #[test]
    fn config_from_env() {
        std::env::set_var(ENV_BUCKET_NAME, "tracker-test");
        std::env::set_var(ENV_BATCH_SIZE, "25");
        std::env::set_var(ENV_SYNC_INTERVAL_MS, "1500");

        let config = EngineConfig::from_env();
        assert_eq!(config.bucket, "tracker-test");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.sync_interval, Duration::from_millis(1500));

        std::env::set_var(ENV_BATCH_SIZE, "not-a-number");
        let config = EngineConfig::from_env();
        assert_eq!(config.batch_size, 10);

        std::env::remove_var(ENV_BUCKET_NAME);
        std::env::remove_var(ENV_BATCH_SIZE);
        std::env::remove_var(ENV_SYNC_INTERVAL_MS);
    }
}
