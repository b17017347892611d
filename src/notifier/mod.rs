//! Public facade of the change-notification engine.
//!
//! [`ChangeNotifier`] ties the pieces together: the [`crate::ListenerRegistry`] decides which
//! keys are watched, the poller keeps watched keys in sync with storage, and every storage
//! call (including the caller's own `write`/`read`/`delete`) runs through one
//! [`crate::ResilientExecutor`].
mod builder;
mod notifier;
mod status;
mod subscription;

pub use builder::*;
pub use notifier::*;
pub use status::*;
pub use subscription::*;
