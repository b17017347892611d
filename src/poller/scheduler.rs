use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::interval;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ChangeDetector;
use crate::metrics;
use crate::ChangeSource;
use crate::Error;
use crate::ExecutorConfig;
use crate::OperationKind;
use crate::PollerConfig;
use crate::ResilientExecutor;
use crate::StorageCollaborator;

#[derive(Debug, Default)]
struct KeyState {
    last_polled: Option<Instant>,
    /// A push channel is currently delivering for this key
    push_live: bool,
    push_token: Option<CancellationToken>,
}

/// Single shared scheduling loop polling every watched key.
///
/// The loop runs only while at least one key is watched. Each tick reads all due keys
/// concurrently (bounded by `max_concurrency`) through the resilient executor. Keys with a live
/// push channel are only polled every `push_safety_poll_interval`.
pub(crate) struct Poller {
    pub(super) storage: Arc<dyn StorageCollaborator>,
    pub(super) executor: Arc<ResilientExecutor>,
    pub(super) detector: Arc<ChangeDetector>,
    pub(super) executor_config: ExecutorConfig,
    config: PollerConfig,
    runtime: Handle,

    interval_ms: AtomicU64,
    keys: Mutex<HashMap<String, KeyState>>,
    /// Cancels the running scheduler loop; `None` while idle
    scheduler: Mutex<Option<CancellationToken>>,
    last_poll_at: Mutex<Option<SystemTime>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Poller {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("interval_ms", &self.interval_ms)
            .field("keys", &self.keys)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Poller {
    pub(crate) fn new(
        storage: Arc<dyn StorageCollaborator>,
        executor: Arc<ResilientExecutor>,
        detector: Arc<ChangeDetector>,
        executor_config: ExecutorConfig,
        config: PollerConfig,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            executor,
            detector,
            executor_config,
            interval_ms: AtomicU64::new(config.polling_interval_ms),
            config,
            runtime,
            keys: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(None),
            last_poll_at: Mutex::new(None),
            shutdown,
        }
    }

    /// Starts watching `key`: opens its push supervisor and makes sure the loop runs.
    pub(crate) fn activate(
        self: &Arc<Self>,
        key: &str,
    ) {
        if self.shutdown.is_cancelled() {
            return;
        }

        {
            let mut keys = self.keys.lock();
            if keys.contains_key(key) {
                return;
            }
            let push_token = self.shutdown.child_token();
            keys.insert(
                key.to_string(),
                KeyState {
                    push_token: Some(push_token.clone()),
                    ..Default::default()
                },
            );
            self.runtime
                .spawn(Arc::clone(self).supervise_push(key.to_string(), push_token));
        }
        debug!(key, "Key activated for polling");

        self.ensure_running();
    }

    /// Stops watching `key`; the loop stops with the last key.
    pub(crate) fn deactivate(
        &self,
        key: &str,
    ) -> bool {
        let (removed, now_idle) = {
            let mut keys = self.keys.lock();
            let removed = keys.remove(key);
            (removed, keys.is_empty())
        };

        let Some(state) = removed else {
            return false;
        };
        if let Some(token) = state.push_token {
            token.cancel();
        }
        debug!(key, "Key deactivated");

        if now_idle {
            self.stop_loop();
        }
        true
    }

    /// Stops watching every key, returning how many were watched
    pub(crate) fn deactivate_all(&self) -> usize {
        let drained: Vec<KeyState> = self.keys.lock().drain().map(|(_, s)| s).collect();
        for token in drained.iter().filter_map(|s| s.push_token.as_ref()) {
            token.cancel();
        }
        self.stop_loop();
        drained.len()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
        self.deactivate_all();
    }

    /// Changes the tick period, restarting a running loop with it. Watched keys are kept.
    pub(crate) fn set_interval(
        self: &Arc<Self>,
        period: Duration,
    ) {
        self.interval_ms
            .store(period.as_millis() as u64, Ordering::Release);
        if self.stop_loop() {
            info!(?period, "Restarting poll scheduler with new interval");
            self.ensure_running();
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    pub(crate) fn is_watched(
        &self,
        key: &str,
    ) -> bool {
        self.keys.lock().contains_key(key)
    }

    pub(crate) fn watched_key_count(&self) -> usize {
        self.keys.lock().len()
    }

    pub(crate) fn is_push_live(
        &self,
        key: &str,
    ) -> bool {
        self.keys.lock().get(key).is_some_and(|s| s.push_live)
    }

    pub(super) fn set_push_live(
        &self,
        key: &str,
        live: bool,
    ) {
        if let Some(state) = self.keys.lock().get_mut(key) {
            state.push_live = live;
        }
    }

    pub(crate) fn last_poll_at(&self) -> Option<SystemTime> {
        *self.last_poll_at.lock()
    }

    fn ensure_running(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() || self.shutdown.is_cancelled() || self.keys.lock().is_empty() {
            return;
        }

        let token = self.shutdown.child_token();
        *scheduler = Some(token.clone());
        self.runtime
            .spawn(Arc::clone(self).run(token, self.interval()));
    }

    /// Returns whether a loop was running
    fn stop_loop(&self) -> bool {
        match self.scheduler.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        period: Duration,
    ) {
        info!(?period, "Poll scheduler started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // an in-flight tick is not interrupted; its reads complete or time out
            self.tick().await;
        }
        info!("Poll scheduler stopped");
    }

    /// One scheduling round
    pub(crate) async fn tick(&self) {
        if !self.storage.is_connected() {
            self.probe_connectivity().await;
            return;
        }

        let due = self.take_due_keys(Instant::now());
        if due.is_empty() {
            return;
        }
        metrics::POLL_TICKS.inc();
        trace!(keys = due.len(), "Polling due keys");

        stream::iter(due)
            .map(|key| self.poll_key(key))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        *self.last_poll_at.lock() = Some(SystemTime::now());
    }

    fn take_due_keys(
        &self,
        now: Instant,
    ) -> Vec<String> {
        let safety = self.config.push_safety_poll_interval().max(self.interval());
        let mut keys = self.keys.lock();

        keys.iter_mut()
            .filter_map(|(key, state)| {
                let due = !state.push_live
                    || state
                        .last_polled
                        .map_or(true, |at| now.duration_since(at) >= safety);
                if due {
                    state.last_polled = Some(now);
                    Some(key.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    async fn poll_key(
        &self,
        key: String,
    ) {
        let storage = self.storage.clone();
        let result = self
            .executor
            .execute(OperationKind::Read, || {
                let storage = storage.clone();
                let key = key.clone();
                async move { storage.read(&key).await }
            })
            .await;

        match result {
            Ok(current) => {
                if self.is_watched(&key) {
                    self.detector.observe(&key, current, ChangeSource::Poll);
                }
            }
            Err(Error::Shutdown) => {}
            Err(e) => {
                metrics::POLL_FAILURES.inc();
                warn!(key = %key, "Poll read failed, keeping last known value: {}", e);
            }
        }
    }

    /// Health probe run instead of reads while storage reports itself disconnected
    async fn probe_connectivity(&self) {
        debug!("Storage disconnected, probing connectivity");
        let storage = self.storage.clone();
        let result = self
            .executor
            .execute(OperationKind::Reconnect, || {
                let storage = storage.clone();
                async move { storage.reconnect().await }
            })
            .await;

        match result {
            Ok(()) => info!("Storage connectivity restored"),
            Err(e) => warn!("Connectivity probe failed, polling stays paused: {}", e),
        }
    }
}
