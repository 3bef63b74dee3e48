//! Message store interface and its SQLite implementation.

use async_trait::async_trait;
use message_database::{queries, AsyncDatabase, DatabaseError, Message};
use thiserror::Error;

/// Store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Store cannot serve requests
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable source of pending messages and sink for send results.
///
/// Implementations must tolerate concurrent `save` calls from send tasks;
/// each message is persisted independently.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` unsent messages.
    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<Message>>;

    /// Every message marked as sent.
    async fn fetch_sent(&self) -> StoreResult<Vec<Message>>;

    /// Persist the message's current state.
    async fn save(&self, message: &Message) -> StoreResult<()>;
}

#[async_trait]
impl MessageStore for AsyncDatabase {
    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<Message>> {
        Ok(self
            .call(move |conn| queries::fetch_pending(conn, limit))
            .await?)
    }

    async fn fetch_sent(&self) -> StoreResult<Vec<Message>> {
        Ok(self.call(queries::fetch_sent).await?)
    }

    async fn save(&self, message: &Message) -> StoreResult<()> {
        let message = message.clone();
        Ok(self
            .call(move |conn| queries::save_message(conn, &message))
            .await?)
    }
}
