//! Three-band DJ EQ and the pipeline interface decks use to drive it
//!
//! Bands (RBJ Audio EQ Cookbook biquads):
//! - Low shelf at 320 Hz
//! - Mid bell at 1 kHz
//! - High shelf at 3.2 kHz
//!
//! Each band covers ±12 dB.

use crate::deck::clamp_eq;
use std::f32::consts::PI;

/// EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub fn index(&self) -> usize {
        match self {
            Self::Low => 0,
            Self::Mid => 1,
            Self::High => 2,
        }
    }
}

/// Live audio graph stage a deck routes through
///
/// Implemented by the DSP EQ on the audio thread and by proxies that
/// forward band changes to it.
pub trait AudioPipeline: Send {
    /// Set a band's gain in dB (clamped to ±12)
    fn set_band(&mut self, band: EqBand, gain_db: f32);

    /// Current gain of a band in dB
    fn band(&self, band: EqBand) -> f32;

    /// Route audio through the pipeline
    fn connect(&mut self);

    /// Bypass the pipeline
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Biquad filter coefficients
#[derive(Clone, Copy)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };
}

/// Biquad filter state for a single channel
#[derive(Default, Clone, Copy)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

#[derive(Clone, Copy)]
enum BandShape {
    LowShelf,
    Peaking { q: f32 },
    HighShelf,
}

/// One EQ band with stereo state
struct Band {
    shape: BandShape,
    freq: f32,
    gain: f32,
    gain_smooth: f32,
    coeffs: BiquadCoeffs,
    left: BiquadState,
    right: BiquadState,
}

impl Band {
    fn new(shape: BandShape, freq: f32) -> Self {
        Self {
            shape,
            freq,
            gain: 0.0,
            gain_smooth: 0.0,
            coeffs: BiquadCoeffs::UNITY,
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }

    fn reset(&mut self) {
        self.left = BiquadState::default();
        self.right = BiquadState::default();
    }

    fn update_coefficients(&mut self, sample_rate: f32) {
        let gain_db = self.gain_smooth;
        if gain_db.abs() < 0.01 {
            self.coeffs = BiquadCoeffs::UNITY;
            return;
        }

        let a = 10.0f32.powf(gain_db / 40.0); // sqrt(10^(dB/20))
        let omega = 2.0 * PI * self.freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();

        self.coeffs = match self.shape {
            BandShape::LowShelf => {
                let alpha = sin_omega / 2.0 * (2.0f32).sqrt(); // Slope = 1
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
            BandShape::HighShelf => {
                let alpha = sin_omega / 2.0 * (2.0f32).sqrt();
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
            BandShape::Peaking { q } => {
                let alpha = sin_omega / (2.0 * q);
                let a0 = 1.0 + alpha / a;
                BiquadCoeffs {
                    a0: (1.0 + alpha * a) / a0,
                    a1: (-2.0 * cos_omega) / a0,
                    a2: (1.0 - alpha * a) / a0,
                    b1: (-2.0 * cos_omega) / a0,
                    b2: (1.0 - alpha / a) / a0,
                }
            }
        };
    }
}

/// Three-band deck EQ
pub struct ThreeBandEq {
    connected: bool,
    sample_rate: f32,
    smooth_coeff: f32,
    bands: [Band; 3],
    needs_update: bool,
}

impl ThreeBandEq {
    /// Create a flat, connected EQ
    pub fn new(sample_rate: f32) -> Self {
        // Smoothing coefficient for ~5ms at sample rate
        let smooth_coeff = 1.0 - (-1.0 / (sample_rate * 0.005)).exp();
        Self {
            connected: true,
            sample_rate,
            smooth_coeff,
            bands: [
                Band::new(BandShape::LowShelf, 320.0),
                Band::new(BandShape::Peaking { q: 0.7 }, 1000.0),
                Band::new(BandShape::HighShelf, 3200.0),
            ],
            needs_update: true,
        }
    }

    /// Clear filter history (e.g. when a new track is attached)
    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }

    /// Move smoothed gains toward their targets, once per block
    fn smooth_and_update(&mut self) {
        let mut changed = self.needs_update;
        for band in &mut self.bands {
            if (band.gain_smooth - band.gain).abs() > 0.001 {
                band.gain_smooth += (band.gain - band.gain_smooth) * self.smooth_coeff;
                changed = true;
            } else if band.gain_smooth != band.gain {
                band.gain_smooth = band.gain;
                changed = true;
            }
        }

        if changed {
            for band in &mut self.bands {
                band.update_coefficients(self.sample_rate);
            }
            self.needs_update = false;
        }
    }

    /// Process interleaved stereo samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.connected {
            return;
        }

        self.smooth_and_update();

        for frame in samples.chunks_exact_mut(2) {
            let mut left = frame[0];
            let mut right = frame[1];
            for band in &mut self.bands {
                left = band.left.process(left, &band.coeffs);
                right = band.right.process(right, &band.coeffs);
            }
            frame[0] = left;
            frame[1] = right;
        }
    }
}

impl AudioPipeline for ThreeBandEq {
    fn set_band(&mut self, band: EqBand, gain_db: f32) {
        self.bands[band.index()].gain = clamp_eq(gain_db);
        self.needs_update = true;
    }

    fn band(&self, band: EqBand) -> f32 {
        self.bands[band.index()].gain
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.reset();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (2.0 * PI * freq * i as f32 / sample_rate).sin() * 0.25;
                [s, s]
            })
            .collect()
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_gain_clamping() {
        let mut eq = ThreeBandEq::new(48000.0);
        eq.set_band(EqBand::Low, 30.0);
        assert_eq!(eq.band(EqBand::Low), 12.0);
        eq.set_band(EqBand::High, -30.0);
        assert_eq!(eq.band(EqBand::High), -12.0);
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ThreeBandEq::new(48000.0);
        let mut samples = sine(440.0, 48000.0, 1024);
        let original = samples.clone();
        eq.process(&mut samples);
        for (a, b) in samples.iter().zip(&original) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_low_cut_attenuates_bass() {
        let mut eq = ThreeBandEq::new(48000.0);
        eq.set_band(EqBand::Low, -12.0);

        let mut samples = sine(60.0, 48000.0, 48000);
        // Let the gain smoothing settle before measuring
        for chunk in samples.chunks_mut(512) {
            eq.process(chunk);
        }
        let tail = &samples[samples.len() / 2..];
        assert!(peak(tail) < 0.25 * 0.5, "peak {}", peak(tail));
    }

    #[test]
    fn test_disconnected_passthrough() {
        let mut eq = ThreeBandEq::new(48000.0);
        eq.set_band(EqBand::Mid, 12.0);
        eq.disconnect();
        assert!(!eq.is_connected());

        let mut samples = vec![0.5, 0.5, 0.3, 0.3];
        let original = samples.clone();
        eq.process(&mut samples);
        assert_eq!(samples, original);
    }
}
