//! Error types for message dispatch.

use crate::kv::BackendError;
use crate::store::StoreError;
use thiserror::Error;

/// Dispatch error type.
///
/// `RateLimit` is a backend failure while checking the limit; `RateLimited`
/// is the limiter saying no. Callers treat the two very differently.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// `start()` called while the polling loop is running
    #[error("message processing is already running")]
    AlreadyRunning,

    /// Store read failed
    #[error("error fetching sent messages: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Store write failed after a successful delivery
    #[error("error updating message {id} status: {source}")]
    Persist {
        id: i64,
        #[source]
        source: StoreError,
    },

    /// Rate limit backend failure
    #[error("rate limit check failed: {0}")]
    RateLimit(#[source] BackendError),

    /// Recipient is over its limit for the current window
    #[error("rate limit exceeded for recipient {0}")]
    RateLimited(String),

    /// Transport failure or non-2xx webhook response
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Every send attempt failed
    #[error("failed after {attempts} attempts: {source}")]
    SendFailed {
        attempts: u32,
        #[source]
        source: Box<DispatchError>,
    },

    /// Cache write failed
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// Cache read or decode failed
    #[error("cache read failed: {0}")]
    CacheRead(String),

    /// Empty cache key
    #[error("message id cannot be empty")]
    InvalidKey,

    /// Unrecognized control command
    #[error("unknown command: {0}")]
    InvalidCommand(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
