use std::time::Duration;

use tokio::sync::broadcast;
use tracing::trace;

use super::OperationKind;
use crate::metrics;
use crate::ErrorCategory;

/// Advisory observability events emitted by the resilient executor
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    OperationFailed {
        kind: OperationKind,
        category: ErrorCategory,
        attempt: u32,
        message: String,
    },
    OperationSucceeded {
        kind: OperationKind,
        attempt: u32,
        elapsed: Duration,
    },
    CircuitOpened { failure_count: u32 },
}

/// Non-blocking fan-out of [`ExecutorEvent`]s.
///
/// Slow receivers lag and lose events; the executor never waits on them.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    sender: broadcast::Sender<ExecutorEvent>,
}

impl EventEmitter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(
        &self,
        event: ExecutorEvent,
    ) {
        match &event {
            ExecutorEvent::OperationFailed { kind, category, .. } => {
                metrics::OPERATION_FAILURES
                    .with_label_values(&[kind.as_str(), category.as_str()])
                    .inc();
            }
            ExecutorEvent::OperationSucceeded { kind, .. } => {
                metrics::OPERATION_SUCCESSES.with_label_values(&[kind.as_str()]).inc();
            }
            ExecutorEvent::CircuitOpened { .. } => {
                metrics::CIRCUIT_OPENED.inc();
            }
        }

        // No receivers is not an error
        if self.sender.send(event).is_err() {
            trace!("No executor event subscribers");
        }
    }
}
