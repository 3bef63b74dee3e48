//! Dispatch engine: lifecycle, polling loop and per-message send path.

use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::kv::KvBackend;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::send_cache::SendCache;
use crate::store::MessageStore;
use crate::transport::{Transport, WebhookPayload};
use chrono::Utc;
use futures_util::future::join_all;
use message_database::Message;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State of the current run. `handle` outlives `stop()` so the next run
/// can wait for it.
#[derive(Default)]
struct RunState {
    processing: bool,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

struct EngineInner {
    config: DispatchConfig,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiter,
    cache: SendCache,
    send_retry: RetryPolicy,
    workers: Arc<Semaphore>,
    state: RwLock<RunState>,
}

/// Background dispatcher for pending messages.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<EngineInner>,
}

impl DispatchEngine {
    /// Build an engine. The polling loop does not run until [`start`](Self::start).
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn MessageStore>,
        kv: Arc<dyn KvBackend>,
        transport: Arc<dyn Transport>,
    ) -> DispatchResult<Self> {
        config.validate()?;

        let backend_retry = config.backend_retry();
        let rate_limiter = RateLimiter::new(
            kv.clone(),
            backend_retry,
            config.rate_limit_max,
            config.rate_limit_window(),
        );
        let cache = SendCache::new(kv, backend_retry, config.cache_ttl());

        Ok(Self {
            inner: Arc::new(EngineInner {
                send_retry: config.send_retry(),
                workers: Arc::new(Semaphore::new(config.max_workers)),
                config,
                store,
                transport,
                rate_limiter,
                cache,
                state: RwLock::new(RunState::default()),
            }),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn cache(&self) -> &SendCache {
        &self.inner.cache
    }

    /// Start the polling loop.
    ///
    /// Fails with `AlreadyRunning` if a loop is active. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> DispatchResult<()> {
        let mut state = self.inner.state.write();
        if state.processing {
            return Err(DispatchError::AlreadyRunning);
        }

        // A stopped run may still be finishing its batch; the new loop waits
        // for it before fetching.
        let previous = state.handle.take();
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run_loop(previous, stop_rx).await });

        state.processing = true;
        state.stop_tx = Some(stop_tx);
        state.handle = Some(handle);

        info!(
            batch_size = self.inner.config.batch_size,
            max_workers = self.inner.config.max_workers,
            poll_interval_secs = self.inner.config.poll_interval_secs,
            "Message processing started"
        );
        Ok(())
    }

    /// Signal the loop to stop. Returns immediately; the in-flight batch
    /// still runs to completion.
    pub fn stop(&self) {
        let mut state = self.inner.state.write();
        Self::signal_stop(&mut state);
    }

    fn signal_stop(state: &mut RunState) {
        let was_running = state.processing;
        state.processing = false;
        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if was_running {
            info!("Message processing stopped");
        }
    }

    /// Stop and wait for the loop (and its in-flight batch) to finish.
    pub async fn shutdown(&self) {
        let handle = {
            let mut state = self.inner.state.write();
            Self::signal_stop(&mut state);
            state.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch loop task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.read().processing
    }

    /// Sent messages that still have a cache entry, as cached.
    ///
    /// Sent messages whose cache entry expired or was never written are left
    /// out. Cache errors are logged per message.
    pub async fn list_sent(&self) -> DispatchResult<Vec<Message>> {
        let stored = self
            .inner
            .store
            .fetch_sent()
            .await
            .map_err(DispatchError::StoreUnavailable)?;

        let cache = &self.inner.cache;
        let lookups = stored
            .iter()
            .filter(|m| !m.message_id.is_empty())
            .map(|m| async move {
                match cache.get(&m.message_id).await {
                    Ok(cached) => cached,
                    Err(e) => {
                        warn!(
                            message_id = %m.message_id,
                            error = %e,
                            "Failed to get cached message"
                        );
                        None
                    }
                }
            });

        Ok(join_all(lookups).await.into_iter().flatten().collect())
    }

    /// Send one message with the configured retry policy.
    pub async fn send_with_retry(&self, message: Message) -> DispatchResult<Message> {
        self.inner.send_with_retry(message).await
    }

    /// Single send attempt: rate limit, deliver, cache, persist.
    pub async fn send(&self, message: Message) -> DispatchResult<Message> {
        self.inner.send(message).await
    }
}

impl EngineInner {
    async fn run_loop(
        self: Arc<Self>,
        previous: Option<JoinHandle<()>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        if let Some(previous) = previous {
            debug!("Waiting for previous run to finish its batch");
            if let Err(e) = previous.await {
                error!(error = %e, "Previous dispatch loop failed");
            }
        }

        let period = self.config.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Dispatch loop running");

        while !*stop_rx.borrow() {
            self.process_batch().await;

            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Dispatch loop exited");
    }

    /// Fetch one batch and send it, returning once every send has finished.
    async fn process_batch(self: &Arc<Self>) {
        let batch = match self.store.fetch_pending(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Error fetching messages");
                return;
            }
        };

        if batch.is_empty() {
            debug!("No pending messages");
            return;
        }

        debug!(count = batch.len(), "Dispatching batch");

        let mut tasks = JoinSet::new();
        for message in batch {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Worker pool closed");
                    break;
                }
            };

            let inner = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let id = message.id;
                let to = message.to.clone();
                if let Err(e) = inner.send_with_retry(message).await {
                    error!(id, to = %to, error = %e, "Error sending message");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Send task panicked");
            }
        }
    }

    async fn send_with_retry(&self, message: Message) -> DispatchResult<Message> {
        let message = &message;
        self.send_retry
            .run(move |attempt| {
                debug!(id = message.id, attempt, "Sending message");
                self.send(message.clone())
            })
            .await
            .map_err(|e| DispatchError::SendFailed {
                attempts: e.attempts,
                source: Box::new(e.last_error),
            })
    }

    async fn send(&self, mut message: Message) -> DispatchResult<Message> {
        match self.rate_limiter.check(&message.to).await {
            Ok(true) => {}
            Ok(false) => return Err(DispatchError::RateLimited(message.to.clone())),
            Err(e) => {
                warn!(to = %message.to, error = %e, "Rate limit check failed, sending anyway");
            }
        }

        let payload = WebhookPayload {
            to: message.to.clone(),
            content: message.content.clone(),
        };
        self.transport.deliver(&payload).await?;

        message.mark_sent(Uuid::new_v4().to_string(), Utc::now());

        if let Err(e) = self.cache.put(&message).await {
            warn!(message_id = %message.message_id, error = %e, "Failed to cache message");
        }

        self.store
            .save(&message)
            .await
            .map_err(|source| DispatchError::Persist {
                id: message.id,
                source,
            })?;

        info!(
            id = message.id,
            to = %message.to,
            message_id = %message.message_id,
            "Message sent"
        );
        Ok(message)
    }
}
