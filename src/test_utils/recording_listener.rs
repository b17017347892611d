use std::sync::Arc;

use parking_lot::Mutex;

use crate::ChangeEvent;
use crate::ChangeListener;
use crate::ChangeType;

/// Listener that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.key.clone()).collect()
    }

    pub fn count_of(
        &self,
        change_type: ChangeType,
    ) -> usize {
        self.events.lock().iter().filter(|e| e.change_type == change_type).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ChangeListener for RecordingListener {
    fn on_change(
        &self,
        event: &ChangeEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}
