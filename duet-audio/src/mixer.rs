//! Mixer implementation - crossfader gain law and master bus

use crate::deck::DeckId;

/// Gain multiplier for a deck at a crossfader position
///
/// Linear law: both decks sit at 0.5 in the centre, so the two gains always
/// sum to 1. This gives an audible dip at centre compared to constant power.
pub fn crossfader_gain(deck: DeckId, position: f32) -> f32 {
    let position = position.clamp(-1.0, 1.0);
    match deck {
        DeckId::A => ((1.0 - position) * 0.5).clamp(0.0, 1.0),
        DeckId::B => ((1.0 + position) * 0.5).clamp(0.0, 1.0),
    }
}

/// Deck volume after the crossfader
pub fn effective_volume(deck: DeckId, volume: f32, position: f32) -> f32 {
    volume * crossfader_gain(deck, position)
}

/// Master bus combining the two (already gain-staged) deck outputs
#[derive(Debug, Default)]
pub struct Mixer;

impl Mixer {
    /// Create a new mixer
    pub fn new() -> Self {
        Self
    }

    /// Sum two stereo buffers into the output
    /// Both inputs and output are interleaved stereo
    pub fn mix(&self, deck_a: &[f32], deck_b: &[f32], output: &mut [f32]) {
        let len = output.len().min(deck_a.len()).min(deck_b.len());

        for (i, sample) in output[..len].iter_mut().enumerate() {
            *sample = soft_clip(deck_a[i] + deck_b[i]);
        }
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Gentle soft clipper for the mix bus
///
/// Transparent below the threshold, then an exponential knee that
/// approaches the ceiling without hard clipping.
#[inline(always)]
fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let sign = x.signum();
    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let ratio = (abs_x - SOFT_CLIP_THRESHOLD) / knee_width;
    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    sign * compressed.min(SOFT_CLIP_CEILING)
}
