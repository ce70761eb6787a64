//! Per-track annotation persistence (cue points and beat grid)

use crate::deck::{CuePoints, GridSource};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistError {
    /// The track no longer exists in the room
    #[error("Track {0} not found")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Beat grid as stored for a track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredGrid {
    pub first_beat_time: Option<f64>,
    pub bpm: Option<f64>,
    pub source: GridSource,
}

/// Everything remembered about a track between sessions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackAnnotations {
    pub cue_points: CuePoints,
    pub grid: Option<StoredGrid>,
}

/// Storage for annotations, keyed by room and track id
pub trait AnnotationStore: Send {
    /// Annotations for a track; `Ok(None)` when the track is unknown
    fn load(&self, room: &str, track_id: &str) -> Result<Option<TrackAnnotations>, PersistError>;

    fn save_cue_points(
        &mut self,
        room: &str,
        track_id: &str,
        cues: &CuePoints,
    ) -> Result<(), PersistError>;

    fn save_beat_grid(
        &mut self,
        room: &str,
        track_id: &str,
        grid: &StoredGrid,
    ) -> Result<(), PersistError>;
}
