use std::fmt;
use std::time::SystemTime;

use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// Storage push channel
    Push,
    /// Scheduled poll read
    Poll,
    /// Write or delete issued through this notifier
    Local,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Push => "push",
            ChangeSource::Poll => "poll",
            ChangeSource::Local => "local",
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change of one key. Not stored anywhere once delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub key: String,
    pub change_type: ChangeType,
    /// New value; `None` for `Deleted`
    pub value: Option<Value>,
    /// Last value known before the change, when there was one
    pub previous_value: Option<Value>,
    /// Detection time
    pub timestamp: SystemTime,
    pub source: ChangeSource,
}

impl ChangeEvent {
    pub fn new(
        key: impl Into<String>,
        change_type: ChangeType,
        value: Option<Value>,
        previous_value: Option<Value>,
        source: ChangeSource,
    ) -> Self {
        Self {
            key: key.into(),
            change_type,
            value,
            previous_value,
            timestamp: SystemTime::now(),
            source,
        }
    }
}
