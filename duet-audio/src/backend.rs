//! Playback backend interface a deck drives

use crate::eq::AudioPipeline;
use std::sync::Arc;
use thiserror::Error;

/// Errors a backend can raise when asked to play
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("No audio attached")]
    NoSource,
    #[error("Playback refused: {0}")]
    Refused(String),
    #[error("Audio engine unavailable")]
    Disconnected,
}

/// Fully decoded track audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved stereo samples
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono downmix of at most the first `max_seconds`, for analysis
    pub fn mono(&self, max_seconds: f64) -> Vec<f32> {
        let limit = (max_seconds.max(0.0) * self.sample_rate as f64) as usize;
        self.samples
            .chunks_exact(2)
            .take(limit)
            .map(|frame| (frame[0] + frame[1]) * 0.5)
            .collect()
    }
}

/// Per-deck audio output
///
/// Positions are in track seconds. Implementations may run the actual audio
/// elsewhere; `position`, `has_ended` and `take_fault` report what that side
/// has observed most recently.
pub trait DeckBackend: Send {
    /// Replace the deck's audio source
    fn attach(&mut self, audio: Arc<DecodedAudio>) -> Result<(), BackendError>;

    /// Release the audio source
    fn detach(&mut self);

    fn play(&mut self) -> Result<(), BackendError>;

    fn pause(&mut self);

    /// Move the playhead, clamped to the attached audio's length
    fn seek(&mut self, seconds: f64);

    /// Current playhead in seconds
    fn position(&self) -> f64;

    /// True once playback ran off the end of the audio
    fn has_ended(&self) -> bool;

    /// A playback failure reported since the last call, if any
    fn take_fault(&mut self) -> Option<String>;

    /// Output gain after volume and crossfader
    fn set_gain(&mut self, gain: f32);

    fn set_rate(&mut self, rate: f64);

    /// Live EQ stage for this deck
    fn pipeline(&mut self) -> &mut dyn AudioPipeline;
}
