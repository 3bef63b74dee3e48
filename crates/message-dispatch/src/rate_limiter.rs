//! Per-recipient fixed-window rate limiter.
//!
//! The first `INCR` of a window sets the key's expiry; the counter vanishes
//! when the window ends and the next send starts a fresh one. A counter whose
//! expiry could not be set is deleted so it cannot outlive its window.

use crate::error::{DispatchError, DispatchResult};
use crate::kv::{BackendError, KvBackend};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key prefix for rate-limit counters.
pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// Fixed-window counter keyed by recipient.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn KvBackend>,
    retry: RetryPolicy,
    max_per_window: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        retry: RetryPolicy,
        max_per_window: i64,
        window: Duration,
    ) -> Self {
        Self {
            backend,
            retry,
            max_per_window,
            window,
        }
    }

    fn key(recipient: &str) -> String {
        format!("{}{}", RATE_LIMIT_PREFIX, recipient)
    }

    /// Count one send for `recipient` and report whether it is allowed.
    ///
    /// Backend failures are `RateLimit` errors, never a denial.
    pub async fn check(&self, recipient: &str) -> DispatchResult<bool> {
        if recipient.is_empty() {
            return Err(DispatchError::RateLimit(BackendError::InvalidArgument(
                "recipient cannot be empty".to_string(),
            )));
        }

        let key = Self::key(recipient);
        let backend = self.backend.as_ref();
        let key_ref = key.as_str();

        let count = self
            .retry
            .run(move |_| backend.incr(key_ref))
            .await
            .map_err(exhausted)?;

        if count == 1 {
            let window = self.window;
            let expired = self
                .retry
                .run(move |_| backend.expire(key_ref, window))
                .await;
            if let Err(e) = expired {
                if let Err(del_err) = self.retry.run(move |_| backend.del(key_ref)).await {
                    warn!(
                        key = %key,
                        error = %del_err.last_error,
                        "Failed to delete rate limit counter without expiry"
                    );
                }
                return Err(exhausted(e));
            }
        }

        let allowed = count <= self.max_per_window;
        debug!(to = %recipient, count, allowed, "Rate limit checked");
        Ok(allowed)
    }

    /// Reset the counter for `recipient`.
    pub async fn clear(&self, recipient: &str) -> DispatchResult<()> {
        if recipient.is_empty() {
            return Err(DispatchError::RateLimit(BackendError::InvalidArgument(
                "recipient cannot be empty".to_string(),
            )));
        }

        let key = Self::key(recipient);
        let backend = self.backend.as_ref();
        let key_ref = key.as_str();

        self.retry
            .run(move |_| backend.del(key_ref))
            .await
            .map_err(exhausted)
    }
}

fn exhausted(e: crate::retry::RetryExhausted<BackendError>) -> DispatchError {
    DispatchError::RateLimit(BackendError::Exhausted {
        attempts: e.attempts,
        last_error: Box::new(e.last_error),
    })
}
