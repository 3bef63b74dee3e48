//! Message dispatch: polls pending messages and delivers them to a webhook.
//!
//! The engine wakes on a fixed interval, fetches a small batch of unsent
//! messages from the store and sends each one through a bounded worker pool.
//! Every send is gated by a per-recipient fixed-window rate limit, retried
//! with linear backoff, cached on success and persisted as sent.
//!
//! # Core Invariants
//!
//! 1. **One Batch At A Time**: batch N+1 is never fetched before every send
//!    of batch N has finished
//! 2. **Bounded Concurrency**: at most `max_workers` sends are in flight
//! 3. **At-Least-Once**: a message that fails every attempt stays unsent and
//!    is picked up again on a later tick
//! 4. **Cache Is Advisory**: cache and rate-limit backend failures never
//!    block a send or a persist
//!
//! # Architecture
//!
//! ```text
//! MessageStore -> DispatchEngine -> RateLimiter -> Transport (webhook)
//!      ^                |                               |
//!      |___ save <______|______ SendCache.put <________|
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod kv;
pub mod rate_limiter;
pub mod redis_kv;
pub mod retry;
pub mod send_cache;
pub mod store;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::DispatchConfig;
pub use control::{handle, ControlRequest, ControlResponse};
pub use engine::DispatchEngine;
pub use error::{DispatchError, DispatchResult};
pub use kv::{BackendError, BackendResult, KvBackend, MemoryKv};
pub use message_database::Message;
pub use rate_limiter::RateLimiter;
pub use redis_kv::RedisKv;
pub use retry::{RetryExhausted, RetryPolicy};
pub use send_cache::SendCache;
pub use store::{MessageStore, StoreError, StoreResult};
pub use transport::{Transport, WebhookClient, WebhookPayload};
