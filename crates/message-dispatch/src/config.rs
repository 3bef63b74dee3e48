//! Configuration for the dispatch engine.

use crate::error::{DispatchError, DispatchResult};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default webhook endpoint.
pub const DEFAULT_WEBHOOK_URL: &str = "https://httpbin.org/post";

/// Upper bound for every interval, timeout and TTL setting (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound for backoff units (one hour).
pub const MAX_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// Upper bound for concurrent sends.
pub const MAX_WORKERS: usize = 1024;

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Webhook endpoint every message is POSTed to.
    pub webhook_url: String,
    /// Maximum unsent messages fetched per tick.
    pub batch_size: usize,
    /// Interval between polling ticks, in seconds.
    pub poll_interval_secs: u64,
    /// Maximum concurrent sends.
    pub max_workers: usize,
    /// Send attempts per message per tick.
    pub max_retries: u32,
    /// Linear backoff unit between send attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Webhook request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Sends allowed per recipient per window.
    pub rate_limit_max: i64,
    /// Rate limit window, in seconds.
    pub rate_limit_window_secs: u64,
    /// Time-to-live of cached sent messages, in seconds.
    pub cache_ttl_secs: u64,
    /// Attempts per cache / rate-limit backend call.
    pub backend_max_retries: u32,
    /// Linear backoff unit between backend attempts, in milliseconds.
    pub backend_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            batch_size: 2,
            poll_interval_secs: 120,
            max_workers: 5,
            max_retries: 3,
            retry_backoff_ms: 100,
            request_timeout_secs: 10,
            rate_limit_max: 10,
            rate_limit_window_secs: 60,
            cache_ttl_secs: 24 * 60 * 60,
            backend_max_retries: 3,
            backend_backoff_ms: 100,
        }
    }
}

impl DispatchConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Override configuration from `DISPATCH_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn load_from_env(&mut self) {
        if let Ok(url) = std::env::var("DISPATCH_WEBHOOK_URL") {
            self.webhook_url = url;
        }
        if let Some(v) = env_parse("DISPATCH_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("DISPATCH_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("DISPATCH_MAX_WORKERS") {
            self.max_workers = v;
        }
        if let Some(v) = env_parse("DISPATCH_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("DISPATCH_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_parse("DISPATCH_RATE_LIMIT_MAX") {
            self.rate_limit_max = v;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.webhook_url.is_empty() {
            return Err(DispatchError::Config("webhook_url cannot be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(DispatchError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_workers == 0 {
            return Err(DispatchError::Config("max_workers must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(DispatchError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 || self.backend_max_retries == 0 {
            return Err(DispatchError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.max_workers > MAX_WORKERS {
            return Err(DispatchError::Config(format!(
                "max_workers must be at most {}",
                MAX_WORKERS
            )));
        }
        if self.rate_limit_max < 1 {
            return Err(DispatchError::Config(
                "rate_limit_max must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(DispatchError::Config(
                "rate_limit_window_secs must be at least 1".to_string(),
            ));
        }
        for (name, secs) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
            ("cache_ttl_secs", self.cache_ttl_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(DispatchError::Config(format!(
                    "{} must be at most {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        for (name, ms) in [
            ("retry_backoff_ms", self.retry_backoff_ms),
            ("backend_backoff_ms", self.backend_backoff_ms),
        ] {
            if ms > MAX_BACKOFF_MS {
                return Err(DispatchError::Config(format!(
                    "{} must be at most {}",
                    name, MAX_BACKOFF_MS
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Retry policy for whole sends.
    pub fn send_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    /// Retry policy for individual cache / rate-limit backend calls.
    pub fn backend_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backend_max_retries,
            Duration::from_millis(self.backend_backoff_ms),
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
