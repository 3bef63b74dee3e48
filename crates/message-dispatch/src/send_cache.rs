//! Cache of successfully sent messages, keyed by dispatch identifier.

use crate::error::{DispatchError, DispatchResult};
use crate::kv::KvBackend;
use crate::retry::RetryPolicy;
use message_database::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Key prefix for cached message snapshots.
pub const MESSAGE_KEY_PREFIX: &str = "message:";

/// TTL-bounded JSON snapshots of sent messages.
#[derive(Clone)]
pub struct SendCache {
    backend: Arc<dyn KvBackend>,
    retry: RetryPolicy,
    ttl: Duration,
}

impl SendCache {
    pub fn new(backend: Arc<dyn KvBackend>, retry: RetryPolicy, ttl: Duration) -> Self {
        Self {
            backend,
            retry,
            ttl,
        }
    }

    fn key(message_id: &str) -> String {
        format!("{}{}", MESSAGE_KEY_PREFIX, message_id)
    }

    /// Store a snapshot of `message` under its dispatch identifier.
    pub async fn put(&self, message: &Message) -> DispatchResult<()> {
        if message.message_id.is_empty() {
            return Err(DispatchError::CacheWrite(format!(
                "message {} has no dispatch id",
                message.id
            )));
        }

        let data = serde_json::to_string(message)
            .map_err(|e| DispatchError::CacheWrite(format!("failed to marshal message: {}", e)))?;

        let key = Self::key(&message.message_id);
        let backend = self.backend.as_ref();
        let key_ref = key.as_str();
        let data_ref = data.as_str();
        let ttl = self.ttl;

        self.retry
            .run(move |_| backend.set(key_ref, data_ref, ttl))
            .await
            .map_err(|e| {
                DispatchError::CacheWrite(format!(
                    "operation failed after {} retries: {}",
                    e.attempts, e.last_error
                ))
            })?;

        debug!(message_id = %message.message_id, "Cached sent message");
        Ok(())
    }

    /// Look up a snapshot. `Ok(None)` means no entry (never written or expired).
    pub async fn get(&self, message_id: &str) -> DispatchResult<Option<Message>> {
        if message_id.is_empty() {
            return Err(DispatchError::InvalidKey);
        }

        let key = Self::key(message_id);
        let backend = self.backend.as_ref();
        let key_ref = key.as_str();

        let data = self
            .retry
            .run(move |_| backend.get(key_ref))
            .await
            .map_err(|e| {
                DispatchError::CacheRead(format!(
                    "operation failed after {} retries: {}",
                    e.attempts, e.last_error
                ))
            })?;

        let Some(data) = data else {
            return Ok(None);
        };

        let message = serde_json::from_str(&data).map_err(|e| {
            DispatchError::CacheRead(format!("failed to unmarshal message: {}", e))
        })?;
        Ok(Some(message))
    }
}
