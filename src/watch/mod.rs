//! Change events and the listeners that receive them.
//!
//! Listeners are typed callbacks ([`ChangeListener`]) registered per key in the
//! [`ListenerRegistry`]. The registry decides whether a key is watched at all: the first
//! listener of a key starts polling it and removing the last one stops polling.
mod event;
mod listener;
mod registry;

pub use event::*;
pub use listener::*;
pub use registry::*;
