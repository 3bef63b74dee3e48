//! Integration tests for the dispatch engine.
//!
//! - `harness.rs`     - In-memory store, scripted transport, failing backend
//! - `lifecycle.rs`   - start / stop / shutdown and the control surface
//! - `rate_limit.rs`  - fixed-window counting and backend failures
//! - `cache.rs`       - send cache round trips, TTL and decode errors
//! - `retry_send.rs`  - per-message retry, denial and persist failures
//! - `end_to_end.rs`  - ticks, batches and redelivery on later ticks
//! - `concurrency.rs` - worker bound and batch barrier
//! - `list_sent.rs`   - cache-backed listing of sent messages
//! - `sqlite.rs`      - engine over the SQLite store

pub(crate) mod harness;

#[allow(unused_imports)]
pub use harness::{ExpireFailingKv, FailingKv, MemoryStore, MockTransport, TestHarness};
