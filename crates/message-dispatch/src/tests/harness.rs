//! Test harness for dispatch integration tests.
//!
//! Provides:
//! - MemoryStore: an in-process message store with injectable failures
//! - MockTransport: a scripted webhook that records calls and concurrency
//! - FailingKv: a backend whose every command fails
//! - ExpireFailingKv: a MemoryKv whose EXPIRE can be made to fail
//! - TestHarness: wires an engine to the above plus a MemoryKv

use crate::config::DispatchConfig;
use crate::engine::DispatchEngine;
use crate::error::{DispatchError, DispatchResult};
use crate::kv::{BackendError, BackendResult, KvBackend, MemoryKv};
use crate::store::{MessageStore, StoreError, StoreResult};
use crate::transport::{Transport, WebhookPayload};
use async_trait::async_trait;
use chrono::Utc;
use message_database::{DatabaseError, Message};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with short backoffs so paused-time tests stay readable.
pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        webhook_url: "http://webhook.test/hook".to_string(),
        batch_size: 2,
        poll_interval_secs: 10,
        max_workers: 5,
        max_retries: 3,
        retry_backoff_ms: 10,
        request_timeout_secs: 1,
        rate_limit_max: 10,
        rate_limit_window_secs: 60,
        cache_ttl_secs: 3600,
        backend_max_retries: 3,
        backend_backoff_ms: 10,
    }
}

/// A message that has already been sent with the given dispatch id.
pub fn sent_message(id: i64, to: &str, dispatch_id: &str) -> Message {
    let now = Utc::now();
    let mut message = Message {
        id,
        to: to.to_string(),
        content: format!("message {}", id),
        sent: false,
        sent_at: None,
        message_id: String::new(),
        created_at: now,
        updated_at: now,
    };
    message.mark_sent(dispatch_id.to_string(), now);
    message
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store keyed by insertion order.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    next_id: Mutex<i64>,
    fail_fetch: AtomicBool,
    fail_save: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending message and return its id.
    pub fn insert(&self, to: &str, content: &str) -> i64 {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let now = Utc::now();
        self.messages.lock().push(Message {
            id: *next_id,
            to: to.to_string(),
            content: content.to_string(),
            sent: false,
            sent_at: None,
            message_id: String::new(),
            created_at: now,
            updated_at: now,
        });
        *next_id
    }

    /// Insert a message as-is (e.g. one already marked sent).
    pub fn insert_raw(&self, message: Message) {
        let mut next_id = self.next_id.lock();
        *next_id = (*next_id).max(message.id);
        self.messages.lock().push(message);
    }

    pub fn get(&self, id: i64) -> Option<Message> {
        self.messages.lock().iter().find(|m| m.id == id).cloned()
    }

    pub fn sent_count(&self) -> usize {
        self.messages.lock().iter().filter(|m| m.sent).count()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<Message>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("fetch disabled".to_string()));
        }
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| !m.sent)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_sent(&self) -> StoreResult<Vec<Message>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("fetch disabled".to_string()));
        }
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| m.sent)
            .cloned()
            .collect())
    }

    async fn save(&self, message: &Message) -> StoreResult<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("save disabled".to_string()));
        }
        let mut messages = self.messages.lock();
        let slot = messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("message {}", message.id)))?;
        *slot = message.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// Outcome of one scripted delivery.
#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    Ok,
    Status(u16),
}

/// Webhook stand-in. Scripted outcomes are consumed first, then every call
/// succeeds.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Delivery>>,
    always_fail: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<WebhookPayload>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: Delivery) {
        self.script.lock().push_back(outcome);
    }

    pub fn fail_times(&self, n: usize) {
        for _ in 0..n {
            self.push_outcome(Delivery::Status(500));
        }
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Time each delivery takes.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Delivery attempts, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<WebhookPayload> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, payload: &WebhookPayload) -> DispatchResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = if self.always_fail.load(Ordering::SeqCst) {
            Delivery::Status(500)
        } else {
            self.script.lock().pop_front().unwrap_or(Delivery::Ok)
        };

        match outcome {
            Delivery::Ok => {
                self.delivered.lock().push(payload.clone());
                Ok(())
            }
            Delivery::Status(code) => Err(DispatchError::Delivery(format!(
                "unexpected status code: {}",
                code
            ))),
        }
    }
}

// =============================================================================
// FailingKv
// =============================================================================

/// Backend that fails every command.
#[derive(Default)]
pub struct FailingKv {
    calls: AtomicUsize,
}

impl FailingKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> BackendResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl KvBackend for FailingKv {
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> BackendResult<()> {
        self.fail()
    }

    async fn get(&self, _key: &str) -> BackendResult<Option<String>> {
        self.fail()
    }

    async fn incr(&self, _key: &str) -> BackendResult<i64> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> BackendResult<()> {
        self.fail()
    }

    async fn del(&self, _key: &str) -> BackendResult<()> {
        self.fail()
    }
}

// =============================================================================
// ExpireFailingKv
// =============================================================================

/// MemoryKv whose `expire` fails while `fail_expire` is set.
#[derive(Default)]
pub struct ExpireFailingKv {
    inner: MemoryKv,
    fail_expire: AtomicBool,
    expire_calls: AtomicUsize,
}

impl ExpireFailingKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_expire(&self, fail: bool) {
        self.fail_expire.store(fail, Ordering::SeqCst);
    }

    pub fn expire_calls(&self) -> usize {
        self.expire_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryKv {
        &self.inner
    }
}

#[async_trait]
impl KvBackend for ExpireFailingKv {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn incr(&self, key: &str) -> BackendResult<i64> {
        self.inner.incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        self.expire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_expire.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection reset".to_string()));
        }
        self.inner.expire(key, ttl).await
    }

    async fn del(&self, key: &str) -> BackendResult<()> {
        self.inner.del(key).await
    }
}

// =============================================================================
// TestHarness
// =============================================================================

/// An engine wired to in-memory collaborators.
pub struct TestHarness {
    pub engine: DispatchEngine,
    pub store: Arc<MemoryStore>,
    pub kv: Arc<MemoryKv>,
    pub transport: Arc<MockTransport>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKv::new());
        let transport = Arc::new(MockTransport::new());
        let engine = DispatchEngine::new(config, store.clone(), kv.clone(), transport.clone())
            .expect("valid test config");

        Self {
            engine,
            store,
            kv,
            transport,
        }
    }

    /// Let spawned work run; with paused time this also advances the clock.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
