//! Resilient execution of storage operations.
//!
//! Every call the notifier makes into the storage collaborator (read, write, delete,
//! reconnect) goes through [`ResilientExecutor::execute`], which:
//! 1. rejects the call immediately while the [`CircuitBreaker`] is open,
//! 2. races the operation against a per-attempt timeout,
//! 3. classifies failures and retries them according to the [`BackoffPolicy`] of their
//!    category, feeding every outcome back into the breaker.
mod backoff;
mod circuit_breaker;
mod events;
mod resilient_executor;
mod resource;

pub use backoff::*;
pub use circuit_breaker::*;
pub use events::ExecutorEvent;
pub(crate) use events::EventEmitter;
pub use resilient_executor::*;
pub use resource::*;

#[cfg(test)]
mod resilient_executor_test;

use std::fmt;
use std::time::Duration;

/// What kind of storage call is being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    Delete,
    Reconnect,
    Subscribe,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Delete => "delete",
            OperationKind::Reconnect => "reconnect",
            OperationKind::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call state carried from one attempt to the next
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionContext {
    pub kind: OperationKind,
    /// 1-based number of the attempt about to run
    pub attempt: u32,
    /// Timeout of the attempt about to run
    pub timeout: Duration,
}

impl ExecutionContext {
    pub fn new(
        kind: OperationKind,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            attempt: 1,
            timeout,
        }
    }
}
