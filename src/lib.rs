//! # d-notify
//!
//! Subscribe to a key of a storage collaborator and get called back whenever its stored value
//! changes.
//!
//! - [`ChangeNotifier`] is the entry point: `subscribe`, `write`, `read`, `delete`, `status`,
//!   `set_polling_interval` and `destroy`.
//! - Changes are found by diffing what storage returns against a [`BoundedTtlCache`], either on
//!   a shared polling schedule or from a push channel when the collaborator offers one.
//! - Every storage call goes through the [`ResilientExecutor`] (timeouts, per-category retry
//!   budgets, circuit breaker).
//!
//! The crate never installs a tracing subscriber; embedders choose where logs go.

mod cache;
mod config;
mod constants;
mod errors;
mod executor;
pub mod metrics;
mod notifier;
mod poller;
mod storage;
mod watch;

pub use cache::*;
pub use config::*;
pub use constants::MIN_POLLING_INTERVAL_MS;
pub use errors::*;
pub use executor::*;
pub use notifier::*;
pub use storage::*;
pub use watch::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
