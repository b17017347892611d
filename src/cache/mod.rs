//! Bounded TTL cache of last-known values.
//!
//! Owned exclusively by the notifier; the poller and the listener registry refer to entries
//! by key only and never mutate them directly.
mod sweeper;
mod ttl_cache;

pub use sweeper::*;
pub use ttl_cache::*;
