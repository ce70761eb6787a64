//! Deck data model - identity, transport, cue points and the per-deck state snapshot

use duet_analysis::{BeatGrid, BeatGridParams, Detection};
use std::fmt;

/// Playback rate range (±8% pitch fader)
pub const MIN_RATE: f64 = 0.92;
pub const MAX_RATE: f64 = 1.08;
/// EQ band gain range in dB
pub const EQ_RANGE_DB: f32 = 12.0;

/// Deck identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    /// Numeric index (0 for A, 1 for B)
    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// The opposite deck
    pub fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Transport state of a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No track loaded
    #[default]
    Empty,
    /// Track audio is being fetched and decoded
    Loading,
    /// Track loaded and stopped
    Ready,
    Playing,
    Paused,
    /// Load or playback failed; reload to recover
    Error,
}

impl TransportState {
    /// True if a track is loaded and can be played
    pub fn has_track(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Named cue point slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CueKind {
    Start,
    End,
    A,
    B,
}

impl CueKind {
    pub const ALL: [CueKind; 4] = [CueKind::Start, CueKind::End, CueKind::A, CueKind::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::A => "A",
            Self::B => "B",
        }
    }
}

/// Cue point times in seconds; no ordering is enforced between them
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CuePoints {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
}

impl CuePoints {
    pub fn get(&self, kind: CueKind) -> Option<f64> {
        match kind {
            CueKind::Start => self.start,
            CueKind::End => self.end,
            CueKind::A => self.a,
            CueKind::B => self.b,
        }
    }

    pub fn set(&mut self, kind: CueKind, time: Option<f64>) {
        let slot = match kind {
            CueKind::Start => &mut self.start,
            CueKind::End => &mut self.end,
            CueKind::A => &mut self.a,
            CueKind::B => &mut self.b,
        };
        *slot = time;
    }

    /// Loop region between cue A and cue B, if both are set in order
    pub fn loop_region(&self) -> Option<(f64, f64)> {
        match (self.a, self.b) {
            (Some(a), Some(b)) if a < b => Some((a, b)),
            _ => None,
        }
    }
}

/// Where the current beat grid came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSource {
    /// Placed by a DJ; detection never replaces it
    Manual,
    /// Seeded by the beat detector
    Detected,
}

impl GridSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Detected => "detected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "detected" => Some(Self::Detected),
            _ => None,
        }
    }
}

/// Track record supplied by the playlist
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub energy: Option<f32>,
    /// Duration as reported by the playlist (seconds)
    pub duration: f64,
    /// Original upload location; its extension hints the audio format
    pub source_uri: Option<String>,
}

/// Complete deck state for UI rendering
#[derive(Debug, Clone, PartialEq)]
pub struct DeckState {
    pub track: Option<TrackRecord>,
    pub transport: TransportState,
    pub current_time: f64, // seconds
    pub duration: f64,     // seconds
    pub volume: f32,       // 0.0 - 1.0
    pub rate: f64,         // 0.92 - 1.08
    pub eq_low: f32,       // dB
    pub eq_mid: f32,       // dB
    pub eq_high: f32,      // dB
    pub first_beat_time: Option<f64>,
    /// Track BPM (at rate 1.0), from the record or detection
    pub bpm: Option<f64>,
    pub grid_source: Option<GridSource>,
    pub cue_points: CuePoints,
    pub looping: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub detection: Option<Detection>,
    pub detection_error: Option<String>,
}

impl Default for DeckState {
    fn default() -> Self {
        Self {
            track: None,
            transport: TransportState::Empty,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            rate: 1.0,
            eq_low: 0.0,
            eq_mid: 0.0,
            eq_high: 0.0,
            first_beat_time: None,
            bpm: None,
            grid_source: None,
            cue_points: CuePoints::default(),
            looping: false,
            loading: false,
            error: None,
            detection: None,
            detection_error: None,
        }
    }
}

impl DeckState {
    /// Empty deck that keeps the channel volume
    pub fn emptied(volume: f32) -> Self {
        Self {
            volume,
            ..Self::default()
        }
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some() && self.transport.has_track()
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.id.as_str())
    }

    /// BPM heard at the current rate
    pub fn effective_bpm(&self) -> Option<f64> {
        self.bpm.map(|bpm| bpm * self.rate)
    }

    /// Grid parameters when a BPM is known
    pub fn grid_params(&self) -> Option<BeatGridParams> {
        self.bpm
            .map(|bpm| BeatGridParams::new(self.first_beat_time, bpm).with_rate(self.rate))
    }

    /// Resolved grid when both BPM and first beat are known
    pub fn grid(&self) -> Option<BeatGrid> {
        self.grid_params().and_then(|p| p.grid())
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(0.0, 1.0)
}

pub fn clamp_rate(rate: f64) -> f64 {
    rate.clamp(MIN_RATE, MAX_RATE)
}

pub fn clamp_eq(gain_db: f32) -> f32 {
    gain_db.clamp(-EQ_RANGE_DB, EQ_RANGE_DB)
}
