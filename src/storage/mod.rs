//! Storage collaborator contract.
//!
//! The notifier never talks to a database directly: everything it knows about keys comes
//! through a [`StorageCollaborator`]. Push support is optional; a collaborator that cannot
//! stream changes keeps the default [`StorageCollaborator::subscribe`] and is polled instead.
mod adaptors;

pub use adaptors::*;

use std::time::SystemTime;

use async_trait::async_trait;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::StorageResult;

/// Opaque JSON-compatible payload stored under a key
pub type Value = serde_json::Value;

/// Stream of change notifications for one key
pub type PushStream = BoxStream<'static, StorageResult<PushNotification>>;

/// Value of a key as read from storage
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub value: Value,
    /// Modification time, when the storage tracks one
    pub last_modified: Option<SystemTime>,
}

impl Snapshot {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            last_modified: None,
        }
    }

    pub fn with_last_modified(
        mut self,
        at: SystemTime,
    ) -> Self {
        self.last_modified = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// The key did not exist before the write
    pub upserted: bool,
    /// An existing value was replaced
    pub modified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

/// A change pushed by storage. `snapshot == None` means the key was deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub key: String,
    pub snapshot: Option<Snapshot>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageCollaborator: Send + Sync + 'static {
    async fn read(
        &self,
        key: &str,
    ) -> StorageResult<Option<Snapshot>>;

    async fn write(
        &self,
        key: &str,
        value: Value,
    ) -> StorageResult<WriteOutcome>;

    async fn delete(
        &self,
        key: &str,
    ) -> StorageResult<DeleteOutcome>;

    /// Opens a push channel for `key`.
    ///
    /// `Ok(None)` means push is not supported for this key and it will be polled.
    async fn subscribe(
        &self,
        _key: &str,
    ) -> StorageResult<Option<PushStream>> {
        Ok(None)
    }

    /// Cheap connectivity check consulted before every polling round
    fn is_connected(&self) -> bool {
        true
    }

    async fn reconnect(&self) -> StorageResult<()> {
        Ok(())
    }
}
