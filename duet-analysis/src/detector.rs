//! Beat detection using short-time energy peaks
//!
//! Offline analysis of a decoded mono buffer: RMS energy envelope, peak
//! picking above an adaptive threshold, then filtering the peaks down to
//! events spaced like beats in the allowed tempo range.

use thiserror::Error;
use tracing::debug;

/// Energy window length in seconds
const WINDOW_SECS: f64 = 0.05;
/// Minimum number of candidates/beats for a usable result
const MIN_EVENTS: usize = 4;
/// Number of beat times reported back
const REPORTED_BEATS: usize = 20;

/// Errors that can occur during beat detection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("No audio to analyze")]
    NoAudio,
    #[error("Not enough transients to detect beats ({found} found)")]
    InsufficientSignal { found: usize },
    #[error("Transients are not regular enough to form a beat ({found} beats kept)")]
    IrregularRhythm { found: usize },
}

/// Tuning for the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Only the first N seconds are analyzed
    pub max_duration_seconds: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Threshold above mean energy (0.0 - 1.0)
    pub sensitivity: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_duration_seconds: 30.0,
            min_bpm: 80.0,
            max_bpm: 180.0,
            sensitivity: 0.7,
        }
    }
}

/// Result of a successful detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Time of the first kept beat (seconds)
    pub first_beat_time: f64,
    /// Tempo rounded to 0.1 BPM
    pub bpm: f64,
    /// 1.0 for perfectly even spacing, toward 0.0 as spacing varies
    pub confidence: f64,
    /// First beats found (at most 20)
    pub beats: Vec<f64>,
}

/// Energy-based beat detector
#[derive(Debug, Clone, Default)]
pub struct BeatDetector {
    options: DetectorOptions,
}

impl BeatDetector {
    /// Create a detector with the given options
    pub fn new(options: DetectorOptions) -> Self {
        let mut options = options;
        options.sensitivity = options.sensitivity.clamp(0.0, 1.0);
        Self { options }
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Analyze mono samples and estimate the beat grid seed
    pub fn detect(&self, samples: &[f32], sample_rate: u32) -> Result<Detection, DetectionError> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(DetectionError::NoAudio);
        }

        let limit = (self.options.max_duration_seconds * sample_rate as f64) as usize;
        let samples = &samples[..samples.len().min(limit.max(1))];

        let window = ((sample_rate as f64 * WINDOW_SECS) as usize).max(2);
        let hop = window / 2;
        let energy = energy_envelope(samples, window, hop);

        let candidates = self.find_candidates(&energy, hop, sample_rate);
        if candidates.len() < MIN_EVENTS {
            return Err(DetectionError::InsufficientSignal {
                found: candidates.len(),
            });
        }

        let beats = self.filter_beats(&candidates);
        if beats.len() < MIN_EVENTS {
            return Err(DetectionError::IrregularRhythm { found: beats.len() });
        }

        let gaps: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let variance = gaps.iter().map(|g| (g - mean_gap).powi(2)).sum::<f64>() / gaps.len() as f64;
        let std_dev = variance.sqrt();

        let bpm = (60.0 / mean_gap * 10.0).round() / 10.0;
        let confidence = (1.0 - std_dev / mean_gap).max(0.0);

        debug!(
            bpm,
            confidence,
            candidates = candidates.len(),
            beats = beats.len(),
            "beat detection finished"
        );

        Ok(Detection {
            first_beat_time: beats[0],
            bpm,
            confidence,
            beats: beats.into_iter().take(REPORTED_BEATS).collect(),
        })
    }

    /// Times of local energy maxima above the adaptive threshold
    fn find_candidates(&self, energy: &[f32], hop: usize, sample_rate: u32) -> Vec<f64> {
        if energy.len() < 3 {
            return Vec::new();
        }

        let mean = energy.iter().sum::<f32>() / energy.len() as f32;
        let threshold = mean * (1.0 + self.options.sensitivity as f32);

        (1..energy.len() - 1)
            .filter(|&i| {
                energy[i] > threshold && energy[i] > energy[i - 1] && energy[i] > energy[i + 1]
            })
            .map(|i| (i * hop) as f64 / sample_rate as f64)
            .collect()
    }

    /// Keep only candidates spaced within the allowed beat period range
    fn filter_beats(&self, candidates: &[f64]) -> Vec<f64> {
        let min_gap = 60.0 / self.options.max_bpm;
        let max_gap = 60.0 / self.options.min_bpm;

        let mut beats: Vec<f64> = Vec::with_capacity(candidates.len());
        for &t in candidates {
            match beats.last() {
                None => beats.push(t),
                Some(&last) => {
                    let gap = t - last;
                    if gap >= min_gap && gap <= max_gap {
                        beats.push(t);
                    }
                }
            }
        }
        beats
    }
}

/// RMS energy per window
fn energy_envelope(samples: &[f32], window: usize, hop: usize) -> Vec<f32> {
    let mut energy = Vec::with_capacity(samples.len() / hop.max(1) + 1);
    let mut start = 0;
    while start + window <= samples.len() {
        let frame = &samples[start..start + window];
        let power: f32 = frame.iter().map(|s| s * s).sum::<f32>() / window as f32;
        energy.push(power.sqrt());
        start += hop;
    }
    energy
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decaying 150 Hz bursts every `interval` seconds starting at `offset`
    fn pulse_train(sample_rate: u32, seconds: f64, offset: f64, interval: f64) -> Vec<f32> {
        let mut onsets = Vec::new();
        let mut onset = offset;
        while onset < seconds {
            onsets.push(onset);
            onset += interval;
        }
        bursts(sample_rate, seconds, &onsets)
    }

    /// Pulses whose gaps cycle through `gaps`
    fn uneven_train(sample_rate: u32, seconds: f64, offset: f64, gaps: &[f64]) -> Vec<f32> {
        let mut onsets = Vec::new();
        let mut onset = offset;
        for gap in gaps.iter().cycle() {
            if onset >= seconds {
                break;
            }
            onsets.push(onset);
            onset += gap;
        }
        bursts(sample_rate, seconds, &onsets)
    }

    fn bursts(sample_rate: u32, seconds: f64, onsets: &[f64]) -> Vec<f32> {
        let len = (seconds * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; len];
        for onset in onsets {
            let start = (onset * sample_rate as f64).round() as usize;
            let burst = (0.3 * sample_rate as f64) as usize;
            for i in 0..burst {
                if start + i >= len {
                    break;
                }
                let t = i as f64 / sample_rate as f64;
                let env = (-t / 0.02).exp();
                let tone = (2.0 * std::f64::consts::PI * 150.0 * t).sin();
                samples[start + i] = (0.9 * env * tone) as f32;
            }
        }
        samples
    }

    #[test]
    fn test_detects_120_bpm() {
        let samples = pulse_train(48000, 10.0, 0.25, 0.5);
        let detection = BeatDetector::default().detect(&samples, 48000).unwrap();

        assert!((detection.bpm - 120.0).abs() < 0.2, "bpm {}", detection.bpm);
        assert!(detection.confidence > 0.9);
        assert!((detection.first_beat_time - 0.25).abs() < 0.03);
        assert_eq!(detection.beats.len(), 20);
    }

    #[test]
    fn test_detects_other_tempo() {
        // 100 BPM = 0.6s period
        let samples = pulse_train(48000, 12.0, 0.5, 0.6);
        let detection = BeatDetector::default().detect(&samples, 48000).unwrap();
        assert!((detection.bpm - 100.0).abs() < 0.5, "bpm {}", detection.bpm);
    }

    #[test]
    fn test_silence_is_insufficient() {
        let samples = vec![0.0f32; 48000 * 5];
        let err = BeatDetector::default().detect(&samples, 48000).unwrap_err();
        assert!(matches!(err, DetectionError::InsufficientSignal { .. }));
    }

    #[test]
    fn test_empty_input() {
        let err = BeatDetector::default().detect(&[], 48000).unwrap_err();
        assert_eq!(err, DetectionError::NoAudio);
    }

    #[test]
    fn test_too_slow_pulses_are_irregular() {
        // 1.0s spacing (60 BPM) never fits the 80-180 BPM gap window
        let samples = pulse_train(48000, 8.0, 0.25, 1.0);
        let err = BeatDetector::default().detect(&samples, 48000).unwrap_err();
        assert!(matches!(err, DetectionError::IrregularRhythm { .. }));
    }

    #[test]
    fn test_analysis_window_is_limited() {
        let options = DetectorOptions {
            max_duration_seconds: 3.0,
            ..Default::default()
        };
        let samples = pulse_train(48000, 10.0, 0.25, 0.5);
        let detection = BeatDetector::new(options).detect(&samples, 48000).unwrap();
        // Only pulses from the first 3 seconds can be reported
        assert!(detection.beats.iter().all(|t| *t < 3.0));
    }

    #[test]
    fn test_confidence_drops_with_uneven_gaps() {
        let samples = uneven_train(48000, 20.0, 0.25, &[0.45, 0.55]);
        let detection = BeatDetector::default().detect(&samples, 48000).unwrap();

        // Mean gap 0.5s, deviation 0.05s
        assert!((detection.bpm - 120.0).abs() < 0.5, "bpm {}", detection.bpm);
        assert!(detection.confidence < 1.0);
        assert!(
            (detection.confidence - 0.9).abs() < 0.01,
            "confidence {}",
            detection.confidence
        );

        let wider = uneven_train(48000, 20.0, 0.25, &[0.4, 0.6]);
        let wider = BeatDetector::default().detect(&wider, 48000).unwrap();
        assert!((wider.confidence - 0.8).abs() < 0.01, "confidence {}", wider.confidence);
        assert!(wider.confidence < detection.confidence);
    }

    #[test]
    fn test_sensitivity_is_clamped() {
        let detector = BeatDetector::new(DetectorOptions {
            sensitivity: 4.0,
            ..Default::default()
        });
        assert_eq!(detector.options().sensitivity, 1.0);
    }
}
