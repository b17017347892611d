//! Helpers shared by the unit tests of every component
mod common;
mod recording_listener;

pub use common::*;
pub use recording_listener::*;
