//! Run execution support.
//!
//! This module provides:
//! - Progress tracking with callbacks
//! - Cancellation between batches

pub mod progress;

pub use progress::{CancelToken, ProgressTracker, ProgressUpdate, RunPhase, SpeciesState};
