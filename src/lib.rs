//! Frame-aligned call coalescing.
//!
//! A [`FrameCoalescer`] wraps a callback so that any number of calls made between two
//! rendering frames collapse into a single call at the next frame, carrying the arguments
//! of the most recent call. Frames come from a host supplied [`FrameScheduler`]; the crate
//! ships [`ManualScheduler`], a deterministic frame loop driven explicitly by its owner.
use thiserror::Error;

pub mod coalesce;
pub mod scheduling;

pub use coalesce::{CoalesceOptions, FrameCoalescer};
pub use scheduling::{manual::ManualScheduler, FrameHandle, FrameScheduler};

/// Error type for the host-side frame loop
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame queue still not empty after {frames} frames, callbacks keep rescheduling")]
    FlushLimitExceeded { frames: usize },
}
