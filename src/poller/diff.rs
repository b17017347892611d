use std::time::Duration;

use crate::CacheEntry;
use crate::ChangeType;
use crate::Snapshot;

/// Outcome of comparing a fresh read with the cached state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diff {
    /// Absent before and now
    Absent,
    Unchanged,
    Created,
    Updated,
    Deleted,
}

impl Diff {
    pub fn change_type(&self) -> Option<ChangeType> {
        match self {
            Diff::Absent | Diff::Unchanged => None,
            Diff::Created => Some(ChangeType::Created),
            Diff::Updated => Some(ChangeType::Updated),
            Diff::Deleted => Some(ChangeType::Deleted),
        }
    }
}

/// Two-tier comparison of `previous` (cached) and `current` (just read).
///
/// When both sides carry a storage-reported modification time and `current` is newer than
/// `previous` by more than `clock_skew_tolerance`, the key is updated. In every other case
/// value equality decides.
pub fn compare(
    previous: Option<&CacheEntry>,
    current: Option<&Snapshot>,
    clock_skew_tolerance: Duration,
) -> Diff {
    match (previous, current) {
        (None, None) => Diff::Absent,
        (None, Some(_)) => Diff::Created,
        (Some(_), None) => Diff::Deleted,
        (Some(previous), Some(current)) => {
            if let (Some(before), Some(now)) = (previous.reported_modified, current.last_modified) {
                let newer = before
                    .checked_add(clock_skew_tolerance)
                    .is_some_and(|threshold| now > threshold);
                if newer {
                    return Diff::Updated;
                }
            }

            if previous.value != current.value {
                Diff::Updated
            } else {
                Diff::Unchanged
            }
        }
    }
}
