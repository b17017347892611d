//! Change detection.
//!
//! [`Poller`] owns the shared scheduling loop and one push supervisor per watched key; both
//! feed what they read into the [`ChangeDetector`], which diffs it against the cache and
//! dispatches the resulting [`crate::ChangeEvent`]s.
mod detector;
mod diff;
mod push;
mod scheduler;

pub(crate) use detector::*;
pub(crate) use scheduler::*;
