use std::any::Any;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::error;
use tracing::trace;

use super::ChangeEvent;
use super::ChangeListener;
use super::WatchOptions;
use crate::metrics;

/// One listener subscribed to one key
struct Registration {
    id: u64,
    listener: Arc<dyn ChangeListener>,
    options: WatchOptions,
    active: AtomicBool,
    /// Bumped by every debounced event; only the latest one is delivered
    debounce_generation: AtomicU64,
}

impl std::fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Registration {
    fn new(
        id: u64,
        listener: Arc<dyn ChangeListener>,
        options: WatchOptions,
    ) -> Self {
        Self {
            id,
            listener,
            options,
            active: AtomicBool::new(true),
            debounce_generation: AtomicU64::new(0),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn deliver(
        self: &Arc<Self>,
        event: &ChangeEvent,
    ) {
        if !self.is_active() {
            return;
        }
        let prepared = match catch_unwind(AssertUnwindSafe(|| self.options.prepare(event))) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                trace!(listener_id = self.id, key = %event.key, "Event filtered out");
                return;
            }
            Err(payload) => {
                error!(
                    listener_id = self.id,
                    key = %event.key,
                    change_type = %event.change_type,
                    "Change filter panicked: {}",
                    panic_message(payload.as_ref())
                );
                return;
            }
        };

        match (self.options.debounce, Handle::try_current()) {
            (Some(window), Ok(handle)) => self.deliver_debounced(&handle, window, prepared),
            _ => self.invoke(&prepared),
        }
    }

    fn deliver_debounced(
        self: &Arc<Self>,
        handle: &Handle,
        window: Duration,
        event: ChangeEvent,
    ) {
        let generation = self.debounce_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let registration = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if registration.debounce_generation.load(Ordering::Acquire) == generation
                && registration.is_active()
            {
                registration.invoke(&event);
            }
        });
    }

    fn invoke(
        &self,
        event: &ChangeEvent,
    ) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.listener.on_change(event))) {
            error!(
                listener_id = self.id,
                key = %event.key,
                change_type = %event.change_type,
                "Change listener panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Listener identity is the allocation the `Arc` points to
fn same_listener(
    a: &Arc<dyn ChangeListener>,
    b: &Arc<dyn ChangeListener>,
) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Result of [`ListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub id: u64,
    /// No listener was registered for the key before this one
    pub first_for_key: bool,
}

/// Result of [`ListenerRegistry::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    NotFound,
    Removed,
    /// The removed listener was the last one; the key is no longer watched
    LastForKey,
}

/// Key to listener-set map.
///
/// A key is present iff at least one listener is registered for it. Dispatch clones the
/// listener list out of the map before invoking anything, so listeners may subscribe or
/// unsubscribe from inside a callback.
#[derive(Debug)]
pub struct ListenerRegistry {
    watchers: DashMap<String, Vec<Arc<Registration>>>,
    next_id: AtomicU64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            watchers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds `listener` to the set of `key`.
    ///
    /// Registering the same `Arc` again keeps a single entry (with the new options) and returns
    /// the original id.
    pub fn register(
        &self,
        key: &str,
        listener: Arc<dyn ChangeListener>,
        options: WatchOptions,
    ) -> Registered {
        let mut registrations = self.watchers.entry(key.to_string()).or_default();
        let first_for_key = registrations.is_empty();

        if let Some(slot) = registrations.iter_mut().find(|r| same_listener(&r.listener, &listener)) {
            let id = slot.id;
            slot.deactivate();
            *slot = Arc::new(Registration::new(id, listener, options));
            trace!(listener_id = id, key, "Listener re-registered");
            return Registered {
                id,
                first_for_key: false,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        registrations.push(Arc::new(Registration::new(id, listener, options)));
        trace!(listener_id = id, key, first_for_key, "Listener registered");

        Registered { id, first_for_key }
    }

    pub fn unregister(
        &self,
        key: &str,
        id: u64,
    ) -> Unregistered {
        let mut found = false;
        let emptied = self
            .watchers
            .remove_if_mut(key, |_, registrations| {
                registrations.retain(|r| {
                    if r.id == id {
                        r.deactivate();
                        found = true;
                        false
                    } else {
                        true
                    }
                });
                registrations.is_empty()
            })
            .is_some();

        match (found, emptied) {
            (false, _) => Unregistered::NotFound,
            (true, false) => Unregistered::Removed,
            (true, true) => {
                trace!(key, "Last listener removed");
                Unregistered::LastForKey
            }
        }
    }

    /// Removes every listener of `key`, returning how many there were
    pub fn remove_key(
        &self,
        key: &str,
    ) -> usize {
        match self.watchers.remove(key) {
            Some((_, registrations)) => {
                registrations.iter().for_each(|r| r.deactivate());
                registrations.len()
            }
            None => 0,
        }
    }

    /// Removes every listener, returning the keys that were watched
    pub fn clear(&self) -> Vec<String> {
        let keys = self.keys();
        for key in &keys {
            self.remove_key(key);
        }
        keys
    }

    /// Delivers `event` to every listener of its key
    pub fn dispatch(
        &self,
        event: &ChangeEvent,
    ) {
        metrics::CHANGE_EVENTS
            .with_label_values(&[event.change_type.as_str(), event.source.as_str()])
            .inc();

        let registrations = match self.watchers.get(&event.key) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        trace!(
            key = %event.key,
            change_type = %event.change_type,
            source = %event.source,
            listeners = registrations.len(),
            "Dispatching change event"
        );
        for registration in &registrations {
            registration.deliver(event);
        }
    }

    pub fn is_watched(
        &self,
        key: &str,
    ) -> bool {
        self.watchers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.watchers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn watched_key_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn listener_count(
        &self,
        key: &str,
    ) -> usize {
        self.watchers.get(key).map(|e| e.len()).unwrap_or(0)
    }
}
