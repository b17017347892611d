use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::DeleteResult;
use super::NotifierBuilder;
use super::NotifierStatus;
use super::Subscription;
use super::WriteResult;
use crate::constants::MIN_POLLING_INTERVAL_MS;
use crate::poller::ChangeDetector;
use crate::poller::Poller;
use crate::BoundedTtlCache;
use crate::CacheStats;
use crate::ChangeEvent;
use crate::ChangeListener;
use crate::ChangeSource;
use crate::Error;
use crate::ExecutorEvent;
use crate::ListenerRegistry;
use crate::NotifierConfig;
use crate::OperationKind;
use crate::ResilientExecutor;
use crate::Result;
use crate::StorageCollaborator;
use crate::Unregistered;
use crate::Value;
use crate::WatchOptions;

/// State shared between a [`ChangeNotifier`] and the [`Subscription`]s it hands out
pub(crate) struct NotifierInner {
    pub(super) storage: Arc<dyn StorageCollaborator>,
    pub(super) executor: Arc<ResilientExecutor>,
    pub(super) cache: Arc<BoundedTtlCache>,
    pub(super) registry: Arc<ListenerRegistry>,
    pub(super) detector: Arc<ChangeDetector>,
    pub(super) poller: Arc<Poller>,
    /// Serializes the watched/unwatched transition of a key with registry changes.
    /// Reentrant: dropping a listener may drop a `Subscription` it captured.
    pub(super) lifecycle: ReentrantMutex<()>,
    pub(super) shutdown: CancellationToken,
    pub(super) destroyed: AtomicBool,
}

impl NotifierInner {
    pub(super) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(super) fn unsubscribe(
        &self,
        key: &str,
        id: u64,
    ) -> bool {
        let _guard = self.lifecycle.lock();
        if self.is_destroyed() {
            return false;
        }

        match self.registry.unregister(key, id) {
            Unregistered::NotFound => false,
            Unregistered::Removed => true,
            Unregistered::LastForKey => {
                self.release_key(key);
                true
            }
        }
    }

    /// Stops polling `key` and drops its cached value. Caller holds `lifecycle`.
    fn release_key(
        &self,
        key: &str,
    ) {
        self.poller.deactivate(key);
        self.cache.invalidate(key);
        debug!(key, "Key no longer watched");
    }

    fn destroy(&self) {
        let _guard = self.lifecycle.lock();
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        self.poller.shutdown();
        let keys = self.registry.clear();
        self.cache.clear();
        self.executor.close();
        info!(watched_keys = keys.len(), "Change notifier destroyed");
    }
}

/// Subscribe to keys of a storage collaborator and get called back when their values change.
///
/// Must be created inside a tokio runtime; see [`NotifierBuilder`].
///
/// # Example
/// ```ignore
/// let storage = Arc::new(MemStorage::new());
/// let notifier = ChangeNotifier::new(storage, NotifierConfig::default())?;
///
/// let subscription = notifier.subscribe_fn("orders", |event: &ChangeEvent| {
///     println!("{} {}", event.key, event.change_type);
/// }, WatchOptions::default())?;
///
/// notifier.write("orders", json!({"status": "new"})).await?;
/// subscription.unsubscribe();
/// notifier.destroy();
/// ```
pub struct ChangeNotifier {
    pub(super) inner: Arc<NotifierInner>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("status", &self.status())
            .field("destroyed", &self.inner.is_destroyed())
            .finish()
    }
}

impl ChangeNotifier {
    /// Builds a notifier with `config` and the cache as resource monitor.
    pub fn new(
        storage: Arc<dyn StorageCollaborator>,
        config: NotifierConfig,
    ) -> Result<Self> {
        NotifierBuilder::new(storage).config(config).build()
    }

    /// Registers `listener` for changes of `key`.
    ///
    /// The first listener of a key starts watching it. Dropping the returned [`Subscription`]
    /// unregisters the listener; the last one to go stops the watch and releases the key's
    /// cache entry.
    pub fn subscribe(
        &self,
        key: &str,
        listener: Arc<dyn ChangeListener>,
        options: WatchOptions,
    ) -> Result<Subscription> {
        validate_key(key)?;

        let registered = {
            let _guard = self.inner.lifecycle.lock();
            self.ensure_open()?;
            let registered = self.inner.registry.register(key, listener, options);
            if registered.first_for_key {
                self.inner.poller.activate(key);
            }
            registered
        };
        debug!(key, listener_id = registered.id, "Listener subscribed");

        Ok(Subscription::new(Arc::downgrade(&self.inner), key, registered.id))
    }

    /// [`Self::subscribe`] for a plain closure
    pub fn subscribe_fn<F>(
        &self,
        key: &str,
        callback: F,
        options: WatchOptions,
    ) -> Result<Subscription>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(key, Arc::new(callback), options)
    }

    /// Removes every listener of `key`, or of every key when `None`.
    ///
    /// Returns the number of listeners removed.
    pub fn unsubscribe_all(
        &self,
        key: Option<&str>,
    ) -> Result<usize> {
        let _guard = self.inner.lifecycle.lock();
        self.ensure_open()?;

        let keys = match key {
            Some(key) => vec![key.to_string()],
            None => self.inner.registry.keys(),
        };

        let mut removed = 0;
        for key in &keys {
            let n = self.inner.registry.remove_key(key);
            if n > 0 {
                self.inner.release_key(key);
                removed += n;
            }
        }
        debug!(keys = keys.len(), removed, "Listeners unsubscribed");
        Ok(removed)
    }

    /// Writes `value` under `key` and notifies in-process watchers right away.
    pub async fn write(
        &self,
        key: &str,
        value: Value,
    ) -> Result<WriteResult> {
        self.ensure_open()?;
        validate_key(key)?;

        let storage = self.inner.storage.clone();
        let outcome = self
            .inner
            .executor
            .execute(OperationKind::Write, || {
                let storage = storage.clone();
                let key = key.to_string();
                let value = value.clone();
                async move { storage.write(&key, value).await }
            })
            .await?;

        if !self.inner.is_destroyed() {
            self.inner.detector.observe_write(key, value, outcome);
        }

        Ok(WriteResult {
            success: true,
            key: key.to_string(),
            upserted: outcome.upserted,
            modified: outcome.modified,
        })
    }

    /// Value of `key`, served from the cache when it holds a live entry.
    ///
    /// A cache miss reads from storage. That read is diffed like a poll, so watchers of `key`
    /// hear about a change it reveals.
    pub async fn read(
        &self,
        key: &str,
    ) -> Result<Option<Value>> {
        self.ensure_open()?;
        validate_key(key)?;

        if let Some(value) = self.inner.cache.get(key) {
            return Ok(Some(value));
        }

        let storage = self.inner.storage.clone();
        let snapshot = self
            .inner
            .executor
            .execute(OperationKind::Read, || {
                let storage = storage.clone();
                let key = key.to_string();
                async move { storage.read(&key).await }
            })
            .await?;

        let value = snapshot.as_ref().map(|s| s.value.clone());
        if !self.inner.is_destroyed() {
            self.inner.detector.observe(key, snapshot, ChangeSource::Poll);
        }
        Ok(value)
    }

    pub async fn delete(
        &self,
        key: &str,
    ) -> Result<DeleteResult> {
        self.ensure_open()?;
        validate_key(key)?;

        let storage = self.inner.storage.clone();
        let outcome = self
            .inner
            .executor
            .execute(OperationKind::Delete, || {
                let storage = storage.clone();
                let key = key.to_string();
                async move { storage.delete(&key).await }
            })
            .await?;

        if !self.inner.is_destroyed() {
            self.inner.detector.observe_delete(key, outcome.deleted);
        }

        Ok(DeleteResult {
            success: true,
            deleted: outcome.deleted,
        })
    }

    pub fn status(&self) -> NotifierStatus {
        let cache_stats = self.inner.cache.stats();
        NotifierStatus {
            polling: self.inner.poller.is_polling(),
            polling_interval_ms: self.inner.poller.interval().as_millis() as u64,
            watched_key_count: self.inner.registry.watched_key_count(),
            cache_size: cache_stats.size,
            last_poll_at: self.inner.poller.last_poll_at(),
            circuit_state: self.inner.executor.circuit_state(),
            cache_stats,
        }
    }

    /// Changes the poll period. Values below 100ms are rejected and leave the period unchanged.
    pub fn set_polling_interval(
        &self,
        interval_ms: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        if interval_ms < MIN_POLLING_INTERVAL_MS {
            return Err(Error::Validation(format!(
                "polling interval must be >= {MIN_POLLING_INTERVAL_MS}ms, got {interval_ms}ms"
            )));
        }

        self.inner
            .poller
            .set_interval(Duration::from_millis(interval_ms));
        info!(interval_ms, "Polling interval changed");
        Ok(())
    }

    /// Keys with at least one registered listener
    pub fn watched_keys(&self) -> Vec<String> {
        self.inner.registry.keys()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn reset_cache_stats(&self) {
        self.inner.cache.reset_stats();
    }

    /// Executor outcome stream; see [`ExecutorEvent`]
    pub fn executor_events(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.inner.executor.events()
    }

    /// Stops polling and push channels, drops every listener and cached value.
    ///
    /// Idempotent. Afterwards every operation fails with [`Error::Shutdown`].
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.is_destroyed() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::Validation("key must not be empty".to_string()));
    }
    Ok(())
}
