use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::DeleteOutcome;
use crate::OperationKind;
use crate::PushNotification;
use crate::PushStream;
use crate::Snapshot;
use crate::StorageCollaborator;
use crate::StorageError;
use crate::StorageResult;
use crate::Value;
use crate::WriteOutcome;

const PUSH_CHANNEL_CAPACITY: usize = 64;

type PushSender = broadcast::Sender<StorageResult<PushNotification>>;

/// In-process [`StorageCollaborator`] backed by a hash map.
///
/// Serves embedded use and tests: connectivity, latency, push support and per-operation
/// failures can all be controlled at runtime.
#[derive(Debug)]
pub struct MemStorage {
    data: RwLock<HashMap<String, Snapshot>>,
    push_channels: Mutex<HashMap<String, PushSender>>,
    injected_failures: Mutex<HashMap<OperationKind, VecDeque<StorageError>>>,
    last_timestamp: Mutex<SystemTime>,
    latency: Mutex<Duration>,

    push_enabled: AtomicBool,
    connected: AtomicBool,
    report_timestamps: AtomicBool,

    reads: AtomicU64,
    subscribes: AtomicU64,
    reconnects: AtomicU64,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    /// Storage without push support that reports modification times
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            push_channels: Mutex::new(HashMap::new()),
            injected_failures: Mutex::new(HashMap::new()),
            last_timestamp: Mutex::new(SystemTime::UNIX_EPOCH),
            latency: Mutex::new(Duration::ZERO),
            push_enabled: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            report_timestamps: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            subscribes: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn with_push() -> Self {
        let storage = Self::new();
        storage.set_push_enabled(true);
        storage
    }

    pub fn set_push_enabled(
        &self,
        enabled: bool,
    ) {
        self.push_enabled.store(enabled, Ordering::Release);
    }

    pub fn set_connected(
        &self,
        connected: bool,
    ) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn set_report_timestamps(
        &self,
        report: bool,
    ) {
        self.report_timestamps.store(report, Ordering::Release);
    }

    /// Delay applied to every read, write and delete
    pub fn set_latency(
        &self,
        latency: Duration,
    ) {
        *self.latency.lock() = latency;
    }

    /// Makes the next `times` calls of `kind` fail with `error`
    pub fn fail_next(
        &self,
        kind: OperationKind,
        error: StorageError,
        times: usize,
    ) {
        let mut failures = self.injected_failures.lock();
        let queue = failures.entry(kind).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Changes `key` without publishing a push notification
    pub fn set_silently(
        &self,
        key: &str,
        value: Value,
    ) {
        let snapshot = self.stamp(value);
        self.data.write().insert(key.to_string(), snapshot);
    }

    /// Ends the push channel of `key` with `error`; the subscriber sees the error then the end
    /// of the stream.
    pub fn break_push_channel(
        &self,
        key: &str,
        error: StorageError,
    ) {
        if let Some(sender) = self.push_channels.lock().remove(key) {
            let _ = sender.send(Err(error));
        }
    }

    /// Number of open push channels
    pub fn push_channel_count(&self) -> usize {
        self.push_channels
            .lock()
            .values()
            .filter(|s| s.receiver_count() > 0)
            .count()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn subscribe_count(&self) -> u64 {
        self.subscribes.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn snapshot_of(
        &self,
        key: &str,
    ) -> Option<Snapshot> {
        self.data.read().get(key).cloned()
    }

    fn take_failure(
        &self,
        kind: OperationKind,
    ) -> StorageResult<()> {
        let mut failures = self.injected_failures.lock();
        match failures.get_mut(&kind).and_then(|q| q.pop_front()) {
            Some(error) => {
                trace!(%kind, %error, "Injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    async fn before_data_op(
        &self,
        kind: OperationKind,
    ) -> StorageResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(StorageError::Connection("storage is disconnected".to_string()));
        }
        self.take_failure(kind)
    }

    /// Strictly increasing modification time, so two writes never share a timestamp
    fn next_timestamp(&self) -> SystemTime {
        let mut last = self.last_timestamp.lock();
        let now = SystemTime::now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::from_millis(1)
        };
        *last = next;
        next
    }

    fn stamp(
        &self,
        value: Value,
    ) -> Snapshot {
        let last_modified = self.next_timestamp();
        Snapshot {
            value,
            last_modified: Some(last_modified),
        }
    }

    fn visible(
        &self,
        snapshot: Snapshot,
    ) -> Snapshot {
        if self.report_timestamps.load(Ordering::Acquire) {
            snapshot
        } else {
            Snapshot::new(snapshot.value)
        }
    }

    fn publish(
        &self,
        key: &str,
        snapshot: Option<Snapshot>,
    ) {
        let mut channels = self.push_channels.lock();
        let Some(sender) = channels.get(key) else {
            return;
        };
        let notification = PushNotification {
            key: key.to_string(),
            snapshot: snapshot.map(|s| self.visible(s)),
        };
        if sender.send(Ok(notification)).is_err() {
            trace!(key, "No live push subscriber, dropping channel");
            channels.remove(key);
        }
    }
}

#[async_trait]
impl StorageCollaborator for MemStorage {
    async fn read(
        &self,
        key: &str,
    ) -> StorageResult<Option<Snapshot>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.before_data_op(OperationKind::Read).await?;

        let snapshot = self.data.read().get(key).cloned();
        Ok(snapshot.map(|s| self.visible(s)))
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
    ) -> StorageResult<WriteOutcome> {
        self.before_data_op(OperationKind::Write).await?;

        let snapshot = self.stamp(value);
        let previous = self.data.write().insert(key.to_string(), snapshot.clone());
        self.publish(key, Some(snapshot));

        Ok(WriteOutcome {
            upserted: previous.is_none(),
            modified: previous.is_some(),
        })
    }

    async fn delete(
        &self,
        key: &str,
    ) -> StorageResult<DeleteOutcome> {
        self.before_data_op(OperationKind::Delete).await?;

        let deleted = self.data.write().remove(key).is_some();
        if deleted {
            self.publish(key, None);
        }
        Ok(DeleteOutcome { deleted })
    }

    async fn subscribe(
        &self,
        key: &str,
    ) -> StorageResult<Option<PushStream>> {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        if !self.push_enabled.load(Ordering::Acquire) {
            return Ok(None);
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(StorageError::Connection("storage is disconnected".to_string()));
        }
        self.take_failure(OperationKind::Subscribe)?;

        let receiver = self
            .push_channels
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(PUSH_CHANNEL_CAPACITY).0)
            .subscribe();
        debug!(key, "Opened push channel");

        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(item) => return Some((item, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Push subscriber lagged behind");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(Some(stream.boxed()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn reconnect(&self) -> StorageResult<()> {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.take_failure(OperationKind::Reconnect)?;
        self.connected.store(true, Ordering::Release);
        debug!("Storage reconnected");
        Ok(())
    }
}
