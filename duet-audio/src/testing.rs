//! In-crate fakes for engine tests

use crate::backend::{BackendError, DeckBackend, DecodedAudio};
use crate::cancel::CancelToken;
use crate::deck::{CuePoints, TrackRecord};
use crate::eq::{AudioPipeline, EqBand};
use crate::loading::{LoadError, TrackSource};
use crate::persist::{AnnotationStore, PersistError, StoredGrid, TrackAnnotations};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub fn track(id: &str, bpm: Option<f64>) -> TrackRecord {
    TrackRecord {
        id: id.to_string(),
        title: format!("Track {id}"),
        artist: "Test".to_string(),
        bpm,
        duration: 10.0,
        source_uri: Some(format!("https://example.com/{id}.mp3")),
        ..Default::default()
    }
}

/// Silent stereo audio of the given length
pub fn silence(seconds: f64) -> DecodedAudio {
    let frames = (seconds * 48000.0) as usize;
    DecodedAudio::new(vec![0.0; frames * 2], 48000)
}

/// Stereo decaying bursts every `interval` seconds starting at `offset`
pub fn pulses(seconds: f64, offset: f64, interval: f64) -> DecodedAudio {
    let rate = 48000u32;
    let frames = (seconds * rate as f64) as usize;
    let mut samples = vec![0.0f32; frames * 2];
    let mut onset = offset;
    while onset < seconds {
        let start = (onset * rate as f64).round() as usize;
        for i in 0..(0.3 * rate as f64) as usize {
            if start + i >= frames {
                break;
            }
            let t = i as f64 / rate as f64;
            let s = (0.9 * (-t / 0.02).exp() * (2.0 * std::f64::consts::PI * 150.0 * t).sin()) as f32;
            samples[(start + i) * 2] = s;
            samples[(start + i) * 2 + 1] = s;
        }
        onset += interval;
    }
    DecodedAudio::new(samples, rate)
}

#[derive(Debug, Default)]
pub struct MockEq {
    pub bands: [f32; 3],
    pub connected: bool,
}

impl AudioPipeline for MockEq {
    fn set_band(&mut self, band: EqBand, gain_db: f32) {
        self.bands[band.index()] = gain_db;
    }

    fn band(&self, band: EqBand) -> f32 {
        self.bands[band.index()]
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Backend that records what it was told and lets tests move the playhead
#[derive(Debug, Default)]
pub struct MockBackend {
    pub audio: Option<Arc<DecodedAudio>>,
    pub playing: bool,
    pub position: f64,
    pub ended: bool,
    pub fault: Option<String>,
    pub refuse_play: Option<String>,
    pub gain: f32,
    pub rate: f64,
    pub play_calls: usize,
    pub seeks: Vec<f64>,
    pub eq: MockEq,
}

impl DeckBackend for MockBackend {
    fn attach(&mut self, audio: Arc<DecodedAudio>) -> Result<(), BackendError> {
        self.audio = Some(audio);
        self.position = 0.0;
        self.ended = false;
        Ok(())
    }

    fn detach(&mut self) {
        self.audio = None;
        self.playing = false;
    }

    fn play(&mut self) -> Result<(), BackendError> {
        if self.audio.is_none() {
            return Err(BackendError::NoSource);
        }
        if let Some(reason) = &self.refuse_play {
            return Err(BackendError::Refused(reason.clone()));
        }
        self.playing = true;
        self.play_calls += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        let duration = self.audio.as_ref().map(|a| a.duration()).unwrap_or(0.0);
        self.position = seconds.clamp(0.0, duration);
        self.ended = false;
        self.seeks.push(self.position);
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn has_ended(&self) -> bool {
        self.ended
    }

    fn take_fault(&mut self) -> Option<String> {
        self.fault.take()
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn pipeline(&mut self) -> &mut dyn AudioPipeline {
        &mut self.eq
    }
}

/// Track source serving canned audio, optionally held back until released
#[derive(Default)]
pub struct ScriptedSource {
    audio: Mutex<HashMap<String, DecodedAudio>>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, audio: DecodedAudio) {
        self.audio.lock().insert(id.to_string(), audio);
    }

    /// Hold fetches of `id` until the returned sender fires
    pub fn gate(&self, id: &str) -> Sender<()> {
        let (tx, rx) = bounded(1);
        self.gates.lock().insert(id.to_string(), rx);
        tx
    }
}

impl TrackSource for ScriptedSource {
    fn fetch(&self, track: &TrackRecord, _cancel: &CancelToken) -> Result<DecodedAudio, LoadError> {
        let gate = self.gates.lock().remove(&track.id);
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        self.audio
            .lock()
            .get(&track.id)
            .cloned()
            .ok_or_else(|| LoadError::NoSource(track.id.clone()))
    }
}

/// Annotation store backed by a map; saves to unregistered tracks fail
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub known: HashSet<String>,
    pub entries: HashMap<String, TrackAnnotations>,
    pub failure: Option<String>,
    pub saves: usize,
}

impl MemoryStore {
    pub fn with_tracks(ids: &[&str]) -> Self {
        Self {
            known: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    fn entry(&mut self, track_id: &str) -> Result<&mut TrackAnnotations, PersistError> {
        if let Some(message) = &self.failure {
            return Err(PersistError::Backend(message.clone()));
        }
        if !self.known.contains(track_id) {
            return Err(PersistError::NotFound(track_id.to_string()));
        }
        self.saves += 1;
        Ok(self.entries.entry(track_id.to_string()).or_default())
    }
}

impl AnnotationStore for MemoryStore {
    fn load(&self, _room: &str, track_id: &str) -> Result<Option<TrackAnnotations>, PersistError> {
        Ok(self.entries.get(track_id).cloned())
    }

    fn save_cue_points(
        &mut self,
        _room: &str,
        track_id: &str,
        cues: &CuePoints,
    ) -> Result<(), PersistError> {
        self.entry(track_id)?.cue_points = *cues;
        Ok(())
    }

    fn save_beat_grid(
        &mut self,
        _room: &str,
        track_id: &str,
        grid: &StoredGrid,
    ) -> Result<(), PersistError> {
        self.entry(track_id)?.grid = Some(*grid);
        Ok(())
    }
}
