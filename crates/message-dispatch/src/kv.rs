//! Key-value backend used by the rate limiter and the send cache.
//!
//! [`crate::RedisKv`] is the production backend. [`MemoryKv`] keeps
//! everything in process and is used when Redis is unreachable and in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Backend error type.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Caller passed an unusable argument (e.g. empty key component)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored value has the wrong shape for the command
    #[error("Invalid value for key {0}")]
    InvalidValue(String),

    /// Backend cannot serve requests
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// All attempts of a backend call failed
    #[error("operation failed after {attempts} retries: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: Box<BackendError>,
    },
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Minimal key-value command set.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()>;

    /// Read `key`; `None` if absent or expired.
    async fn get(&self, key: &str) -> BackendResult<Option<String>>;

    /// Increment the integer at `key` (absent counts as 0) and return the new value.
    async fn incr(&self, key: &str) -> BackendResult<i64>;

    /// Set the time-to-live of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()>;

    /// Delete `key`. Missing keys are not an error.
    async fn del(&self, key: &str) -> BackendResult<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process backend with Redis-like expiry semantics.
///
/// Deadlines are measured on the tokio clock so paused-time tests can
/// advance past them.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> BackendResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let live = entries.get(key).is_some_and(|e| e.is_live(now));
        if !live {
            entries.insert(
                key.to_string(),
                Entry {
                    value: "1".to_string(),
                    expires_at: None,
                },
            );
            return Ok(1);
        }

        let entry = entries
            .get_mut(key)
            .ok_or_else(|| BackendError::InvalidValue(key.to_string()))?;

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| BackendError::InvalidValue(key.to_string()))?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| BackendError::InvalidValue(key.to_string()))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        let now = Instant::now();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = now.checked_add(ttl);
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> BackendResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_expire() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_existing_deadline() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("c").await.unwrap(), 1);
        kv.expire("c", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(kv.incr("c").await.unwrap(), 2);

        // Still the original 60s deadline, not reset by the second INCR.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(kv.incr("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_non_integer_is_error() {
        let kv = MemoryKv::new();
        kv.set("k", "not-a-number", Duration::from_secs(10)).await.unwrap();
        assert!(matches!(
            kv.incr("k").await,
            Err(BackendError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_del_missing_key_is_ok() {
        let kv = MemoryKv::new();
        assert!(kv.del("missing").await.is_ok());

        kv.set("k", "v", Duration::from_secs(10)).await.unwrap();
        kv.del("k").await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_missing_key_is_noop() {
        let kv = MemoryKv::new();
        kv.expire("missing", Duration::from_secs(1)).await.unwrap();
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        assert_eq!(kv.incr("c").await.unwrap(), 1);
        kv.expire("c", Duration::MAX).await.unwrap();
        assert_eq!(kv.incr("c").await.unwrap(), 2);
    }
}
