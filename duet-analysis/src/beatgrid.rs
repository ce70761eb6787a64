//! Beat grid model for beat-synchronized mixing
//!
//! Maps 1-indexed beat numbers to playback times (in seconds) and back.
//! Beat 1 sits on the grid anchor; the meter is fixed at 4/4.

use thiserror::Error;

/// Beats per bar (the grid only models 4/4)
pub const BEATS_PER_BAR: i64 = 4;

/// Errors raised when building a grid from invalid parameters
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum GridError {
    #[error("BPM must be positive, got {0}")]
    InvalidBpm(f64),
    #[error("Rate must be positive, got {0}")]
    InvalidRate(f64),
    #[error("First beat time must be non-negative, got {0}")]
    NegativeAnchor(f64),
}

/// Grid parameters as stored on a deck
///
/// The anchor is optional: a track can have a known BPM before anyone
/// has placed its first beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGridParams {
    pub first_beat_time: Option<f64>,
    pub bpm: f64,
    pub rate: f64,
}

impl BeatGridParams {
    pub fn new(first_beat_time: Option<f64>, bpm: f64) -> Self {
        Self {
            first_beat_time,
            bpm,
            rate: 1.0,
        }
    }

    /// Same parameters played back at a different rate
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Resolve into a usable grid (None without an anchor or with bad values)
    pub fn grid(&self) -> Option<BeatGrid> {
        let first = self.first_beat_time?;
        BeatGrid::new(first, self.bpm, self.rate).ok()
    }
}

/// Position within the grid: whole beat plus fractional phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatPhase {
    /// Beat currently in progress (1-indexed, never below 1)
    pub beat_number: i64,
    /// Fraction of the beat elapsed (0.0 - 1.0)
    pub phase: f64,
}

/// A resolved beat grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGrid {
    first_beat_time: f64,
    bpm: f64,
    rate: f64,
    /// Seconds per beat at `rate` (cached)
    beat_duration: f64,
}

impl BeatGrid {
    /// Create a grid anchored at `first_beat_time` seconds
    pub fn new(first_beat_time: f64, bpm: f64, rate: f64) -> Result<Self, GridError> {
        if !(bpm > 0.0) || !bpm.is_finite() {
            return Err(GridError::InvalidBpm(bpm));
        }
        if !(rate > 0.0) || !rate.is_finite() {
            return Err(GridError::InvalidRate(rate));
        }
        if !(first_beat_time >= 0.0) {
            return Err(GridError::NegativeAnchor(first_beat_time));
        }
        Ok(Self {
            first_beat_time,
            bpm,
            rate,
            beat_duration: 60.0 / (bpm * rate),
        })
    }

    pub fn first_beat_time(&self) -> f64 {
        self.first_beat_time
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Tempo actually heard (bpm scaled by rate)
    pub fn effective_bpm(&self) -> f64 {
        self.bpm * self.rate
    }

    /// Seconds between two beats at the current rate
    pub fn beat_duration(&self) -> f64 {
        self.beat_duration
    }

    /// Time of beat `n` (1-indexed)
    pub fn beat_time(&self, n: i64) -> f64 {
        self.first_beat_time + (n - 1) as f64 * self.beat_duration
    }

    /// Fractional beat position of `t`, where the anchor is 1.0
    fn absolute_beat(&self, t: f64) -> f64 {
        (t - self.first_beat_time) / self.beat_duration + 1.0
    }

    /// Beat nearest to `t`; times before the anchor saturate to beat 1
    pub fn closest_beat(&self, t: f64) -> i64 {
        let n = ((t - self.first_beat_time) / self.beat_duration).round() as i64 + 1;
        n.max(1)
    }

    /// Snap `t` to the nearest beat
    pub fn quantize(&self, t: f64) -> f64 {
        self.beat_time(self.closest_beat(t))
    }

    /// All beat times within `[start, end]`, ascending
    pub fn beats_in_range(&self, start: f64, end: f64) -> Vec<f64> {
        if !start.is_finite() || !end.is_finite() {
            return Vec::new();
        }

        let first = ((start - self.first_beat_time) / self.beat_duration).ceil() as i64 + 1;
        let mut n = first.max(1);
        // Division rounding can overshoot a beat sitting exactly on `start`
        while n > 1 && self.beat_time(n - 1) >= start {
            n -= 1;
        }
        let mut beats = Vec::new();

        loop {
            let t = self.beat_time(n);
            if t > end {
                break;
            }
            beats.push(t);
            n += 1;
        }

        beats
    }

    /// Bar containing the beat nearest to `t` (1-indexed)
    pub fn bar_number(&self, t: f64) -> i64 {
        let beat = self.closest_beat(t);
        (beat + BEATS_PER_BAR - 1) / BEATS_PER_BAR
    }

    /// Position of the nearest beat within its bar (1..=4)
    pub fn beat_in_bar(&self, t: f64) -> i64 {
        (self.closest_beat(t) - 1).rem_euclid(BEATS_PER_BAR) + 1
    }

    /// Beat in progress at `t` and how far into it we are
    pub fn beat_phase(&self, t: f64) -> BeatPhase {
        let absolute = self.absolute_beat(t);
        let whole = absolute.floor();
        BeatPhase {
            beat_number: (whole as i64).max(1),
            phase: (absolute - whole).clamp(0.0, 1.0),
        }
    }

    /// Time on `target` that sits on the same beat and phase as `source_time` on `self`
    ///
    /// Lets two tracks at different tempos line up their beat boundaries while
    /// keeping the sub-beat offset.
    pub fn aligned_position(&self, source_time: f64, target: &BeatGrid) -> f64 {
        let source = self.beat_phase(source_time);
        let position = target.beat_time(source.beat_number) + source.phase * target.beat_duration;
        position.max(0.0)
    }
}
