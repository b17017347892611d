use std::sync::Weak;

use super::NotifierInner;

/// Registration of one listener on one key.
///
/// Dropping it unregisters the listener. Use [`Subscription::detach`] to keep the listener
/// until [`crate::ChangeNotifier::unsubscribe_all`] or `destroy()`.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    id: u64,
    inner: Weak<NotifierInner>,
}

impl Subscription {
    pub(super) fn new(
        inner: Weak<NotifierInner>,
        key: &str,
        id: u64,
    ) -> Self {
        Self {
            key: key.to_string(),
            id,
            inner,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregisters the listener; `false` if it was already gone
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    pub fn detach(mut self) {
        self.inner = Weak::new();
    }

    fn release(&mut self) -> bool {
        match std::mem::take(&mut self.inner).upgrade() {
            Some(inner) => inner.unsubscribe(&self.key, self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
