use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use tracing::debug;

use super::diff::compare;
use super::diff::Diff;
use crate::constants::DETECT_LOCK_STRIPES;
use crate::BoundedTtlCache;
use crate::ChangeEvent;
use crate::ChangeSource;
use crate::ChangeType;
use crate::ListenerRegistry;
use crate::Snapshot;
use crate::Value;
use crate::WriteOutcome;

/// Diffs observed key states against the cache, updates the cache and dispatches the
/// resulting events.
///
/// Observations of one key are serialized, so its listeners see events in detection order
/// whether they come from polls, pushes or local writes.
///
/// Listeners never run under a detection stripe. An event is queued on its key while the
/// stripe is held; the first caller to find the queue empty delivers it, and any event queued
/// meanwhile, after releasing the stripe. Other callers return once their event is queued.
#[derive(Debug)]
pub(crate) struct ChangeDetector {
    cache: Arc<BoundedTtlCache>,
    registry: Arc<ListenerRegistry>,
    clock_skew_tolerance: Duration,
    stripes: Vec<Mutex<()>>,
    /// Present for a key while some caller is delivering its events
    pub(crate) pending: DashMap<String, VecDeque<ChangeEvent>>,
}

impl ChangeDetector {
    pub(crate) fn new(
        cache: Arc<BoundedTtlCache>,
        registry: Arc<ListenerRegistry>,
        clock_skew_tolerance: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            clock_skew_tolerance,
            stripes: (0..DETECT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            pending: DashMap::new(),
        }
    }

    fn lock(
        &self,
        key: &str,
    ) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe].lock()
    }

    /// Applies a read (`current == None` means the key does not exist) from a poll or push.
    pub(crate) fn observe(
        &self,
        key: &str,
        current: Option<Snapshot>,
        source: ChangeSource,
    ) -> Option<ChangeEvent> {
        let guard = self.lock(key);

        let previous = self.cache.get_entry(key);
        let diff = compare(previous.as_ref(), current.as_ref(), self.clock_skew_tolerance);
        let previous_value = previous.map(|e| e.value);

        let event = match (diff, current) {
            (Diff::Deleted, _) => {
                self.cache.invalidate(key);
                Some(ChangeEvent::new(key, ChangeType::Deleted, None, previous_value, source))
            }
            (Diff::Created | Diff::Updated, Some(current)) => {
                let value = current.value.clone();
                self.cache.set(key, current, None);
                diff.change_type()
                    .map(|t| ChangeEvent::new(key, t, Some(value), previous_value, source))
            }
            (Diff::Unchanged, Some(current)) => {
                // keeps the entry of a watched key from expiring while it does not change
                self.cache.set(key, current, None);
                None
            }
            _ => None,
        };

        self.emit(guard, event)
    }

    /// Applies a successful write issued through the notifier
    pub(crate) fn observe_write(
        &self,
        key: &str,
        value: Value,
        outcome: WriteOutcome,
    ) -> Option<ChangeEvent> {
        let guard = self.lock(key);

        let previous_value = self.cache.get_entry(key).map(|e| e.value);
        let change_type = match &previous_value {
            _ if outcome.upserted => Some(ChangeType::Created),
            Some(previous) if *previous == value => None,
            _ => Some(ChangeType::Updated),
        };

        self.cache.set(key, Snapshot::new(value.clone()), None);
        let event = change_type
            .map(|t| ChangeEvent::new(key, t, Some(value), previous_value, ChangeSource::Local));
        self.emit(guard, event)
    }

    /// Applies a delete issued through the notifier
    pub(crate) fn observe_delete(
        &self,
        key: &str,
        deleted: bool,
    ) -> Option<ChangeEvent> {
        let guard = self.lock(key);

        let previous_value = self.cache.get_entry(key).map(|e| e.value);
        self.cache.invalidate(key);

        let event = (deleted || previous_value.is_some()).then(|| {
            ChangeEvent::new(key, ChangeType::Deleted, None, previous_value, ChangeSource::Local)
        });
        self.emit(guard, event)
    }

    fn emit(
        &self,
        guard: MutexGuard<'_, ()>,
        event: Option<ChangeEvent>,
    ) -> Option<ChangeEvent> {
        let event = event?;
        debug!(
            key = %event.key,
            change_type = %event.change_type,
            source = %event.source,
            "Change detected"
        );
        let deliver = match self.pending.entry(event.key.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(event.clone());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([event.clone()]));
                true
            }
        };
        drop(guard);

        if deliver {
            self.deliver_pending(&event.key);
        }
        Some(event)
    }

    fn deliver_pending(
        &self,
        key: &str,
    ) {
        loop {
            let next = self.pending.get_mut(key).and_then(|mut queue| queue.pop_front());
            match next {
                Some(event) => self.registry.dispatch(&event),
                None => {
                    let released = self.pending.remove_if(key, |_, queue| queue.is_empty());
                    if released.is_some() || !self.pending.contains_key(key) {
                        return;
                    }
                }
            }
        }
    }
}
