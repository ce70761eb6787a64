//! Audio analysis for Duet
//!
//! Provides the beat grid model used for quantizing and aligning decks,
//! and an energy-based beat detector that seeds it.

mod beatgrid;
mod detector;

pub use beatgrid::{BeatGrid, BeatGridParams, BeatPhase, GridError, BEATS_PER_BAR};
pub use detector::{BeatDetector, Detection, DetectionError, DetectorOptions};
