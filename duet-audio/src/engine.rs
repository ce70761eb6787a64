//! Audio engine - renders both decks on the audio thread
//!
//! The control side talks to the engine only through [`AudioCommand`]s on a
//! bounded channel. The audio side reports playheads back through per-deck
//! [`VoiceTelemetry`] atomics, so neither side ever waits on the other.

use crate::backend::{BackendError, DeckBackend, DecodedAudio};
use crate::deck::{clamp_eq, DeckId};
use crate::eq::{AudioPipeline, EqBand, ThreeBandEq};
use crate::mixer::Mixer;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Commands sent to the audio engine
#[derive(Debug, Clone)]
pub enum AudioCommand {
    // Using Arc to avoid copying large sample data through channels
    Attach(DeckId, Arc<DecodedAudio>),
    Detach(DeckId),
    Play(DeckId),
    Pause(DeckId),
    Seek(DeckId, f64),
    SetGain(DeckId, f32),
    SetRate(DeckId, f64),
    SetEqBand(DeckId, EqBand, f32),
    SetEqConnected(DeckId, bool),
    Shutdown,
}

/// Playhead state published by the audio thread
#[derive(Debug, Default)]
pub struct VoiceTelemetry {
    /// Seconds, as f64 bits
    position: AtomicU64,
    ended: AtomicBool,
}

impl VoiceTelemetry {
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    pub fn set_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn set_ended(&self, ended: bool) {
        self.ended.store(ended, Ordering::Release);
    }
}

/// Smoothing coefficient for deck gain (~5ms at 48kHz)
const GAIN_SMOOTH_COEFF: f32 = 0.995;

/// Maximum buffer size for pre-allocated processing buffers
const MAX_BUFFER_SIZE: usize = 4096;

/// One deck's sample player
struct Voice {
    audio: Option<Arc<DecodedAudio>>,
    playing: bool,
    /// Read head in source frames
    position: f64,
    rate: f64,
    gain: f32,
    smoothed_gain: f32,
    eq: ThreeBandEq,
    output_rate: u32,
    telemetry: Arc<VoiceTelemetry>,
}

impl Voice {
    fn new(output_rate: u32, telemetry: Arc<VoiceTelemetry>) -> Self {
        Self {
            audio: None,
            playing: false,
            position: 0.0,
            rate: 1.0,
            gain: 0.0,
            smoothed_gain: 0.0,
            eq: ThreeBandEq::new(output_rate as f32),
            output_rate,
            telemetry,
        }
    }

    fn source_rate(&self) -> f64 {
        self.audio
            .as_ref()
            .map(|a| a.sample_rate as f64)
            .unwrap_or(self.output_rate as f64)
    }

    fn attach(&mut self, audio: Arc<DecodedAudio>) {
        self.audio = Some(audio);
        self.playing = false;
        self.position = 0.0;
        self.eq.reset();
        self.publish();
    }

    fn detach(&mut self) {
        self.audio = None;
        self.playing = false;
        self.position = 0.0;
        self.publish();
    }

    fn seek(&mut self, seconds: f64) {
        let Some(audio) = &self.audio else {
            return;
        };
        let seconds = seconds.clamp(0.0, audio.duration());
        self.position = seconds * audio.sample_rate as f64;
        self.telemetry.set_ended(false);
        self.publish();
    }

    fn publish(&self) {
        self.telemetry.set_position(self.position / self.source_rate());
    }

    /// Render into interleaved stereo `out` (already zeroed)
    fn render(&mut self, out: &mut [f32]) {
        let Some(audio) = self.audio.clone() else {
            return;
        };
        if !self.playing {
            return;
        }

        let step = self.rate * audio.sample_rate as f64 / self.output_rate as f64;
        let frames = audio.frames();
        let samples = audio.samples.as_slice();

        for frame in out.chunks_exact_mut(2) {
            let index = self.position as usize;
            if index + 1 >= frames {
                self.playing = false;
                self.telemetry.set_ended(true);
                break;
            }

            self.smoothed_gain =
                GAIN_SMOOTH_COEFF * self.smoothed_gain + (1.0 - GAIN_SMOOTH_COEFF) * self.gain;

            // Linear interpolation between neighbouring frames
            let frac = (self.position - index as f64) as f32;
            let i = index * 2;
            let left = samples[i] + (samples[i + 2] - samples[i]) * frac;
            let right = samples[i + 1] + (samples[i + 3] - samples[i + 1]) * frac;

            frame[0] = left * self.smoothed_gain;
            frame[1] = right * self.smoothed_gain;
            self.position += step;
        }

        self.eq.process(out);
        self.publish();
    }
}

/// Audio engine state (held in audio thread)
pub struct EngineState {
    voices: [Voice; 2],
    mixer: Mixer,
    // Pre-allocated processing buffers (avoids allocation in audio callback)
    buffer_a: Vec<f32>,
    buffer_b: Vec<f32>,
}

impl EngineState {
    pub fn new(sample_rate: u32, telemetry: [Arc<VoiceTelemetry>; 2]) -> Self {
        let [telemetry_a, telemetry_b] = telemetry;
        Self {
            voices: [
                Voice::new(sample_rate, telemetry_a),
                Voice::new(sample_rate, telemetry_b),
            ],
            mixer: Mixer::new(),
            buffer_a: vec![0.0f32; MAX_BUFFER_SIZE],
            buffer_b: vec![0.0f32; MAX_BUFFER_SIZE],
        }
    }

    pub fn handle_command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Attach(deck, audio) => self.voices[deck.index()].attach(audio),
            AudioCommand::Detach(deck) => self.voices[deck.index()].detach(),
            AudioCommand::Play(deck) => {
                let voice = &mut self.voices[deck.index()];
                voice.playing = voice.audio.is_some();
            }
            AudioCommand::Pause(deck) => self.voices[deck.index()].playing = false,
            AudioCommand::Seek(deck, seconds) => self.voices[deck.index()].seek(seconds),
            AudioCommand::SetGain(deck, gain) => {
                self.voices[deck.index()].gain = gain.clamp(0.0, 1.0)
            }
            AudioCommand::SetRate(deck, rate) => {
                if rate.is_finite() && rate > 0.0 {
                    self.voices[deck.index()].rate = rate;
                }
            }
            AudioCommand::SetEqBand(deck, band, gain_db) => {
                self.voices[deck.index()].eq.set_band(band, gain_db)
            }
            AudioCommand::SetEqConnected(deck, connected) => {
                let eq = &mut self.voices[deck.index()].eq;
                if connected {
                    eq.connect();
                } else {
                    eq.disconnect();
                }
            }
            AudioCommand::Shutdown => {}
        }
    }

    /// Process audio for output buffer
    pub fn process(&mut self, output: &mut [f32]) {
        let len = output.len();

        // Ensure pre-allocated buffers are large enough
        if len > self.buffer_a.len() {
            self.buffer_a.resize(len, 0.0);
            self.buffer_b.resize(len, 0.0);
        }

        let buf_a = &mut self.buffer_a[..len];
        let buf_b = &mut self.buffer_b[..len];
        buf_a.fill(0.0);
        buf_b.fill(0.0);

        let [voice_a, voice_b] = &mut self.voices;
        voice_a.render(buf_a);
        voice_b.render(buf_b);

        self.mixer.mix(buf_a, buf_b, output);
    }
}

/// Handle to communicate with the audio engine
pub struct AudioEngine {
    /// Send commands to audio thread
    command_tx: Sender<AudioCommand>,
    telemetry: [Arc<VoiceTelemetry>; 2],
}

impl AudioEngine {
    /// Create the command channel
    /// Buffer size of 1024 provides headroom for command bursts without saturation
    pub fn create_channel() -> (Sender<AudioCommand>, Receiver<AudioCommand>) {
        bounded(1024)
    }

    pub fn new(command_tx: Sender<AudioCommand>) -> Self {
        Self {
            command_tx,
            telemetry: [Arc::default(), Arc::default()],
        }
    }

    /// Telemetry to hand to [`EngineState::new`]
    pub fn telemetry(&self) -> [Arc<VoiceTelemetry>; 2] {
        self.telemetry.clone()
    }

    /// Send a command to the audio engine
    pub fn send(&self, cmd: AudioCommand) {
        let _ = self.command_tx.try_send(cmd);
    }

    /// Deck backend driving one voice of this engine
    pub fn deck_backend(&self, deck: DeckId) -> EngineDeckBackend {
        EngineDeckBackend {
            deck,
            tx: self.command_tx.clone(),
            telemetry: Arc::clone(&self.telemetry[deck.index()]),
            pipeline: RemotePipeline::new(deck, self.command_tx.clone()),
            duration: 0.0,
            attached: false,
            fault: None,
        }
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_tx.try_send(AudioCommand::Shutdown);
    }
}

/// EQ proxy forwarding band changes to a voice on the audio thread
pub struct RemotePipeline {
    deck: DeckId,
    tx: Sender<AudioCommand>,
    bands: [f32; 3],
    connected: bool,
}

impl RemotePipeline {
    fn new(deck: DeckId, tx: Sender<AudioCommand>) -> Self {
        Self {
            deck,
            tx,
            bands: [0.0; 3],
            connected: true,
        }
    }
}

impl AudioPipeline for RemotePipeline {
    fn set_band(&mut self, band: EqBand, gain_db: f32) {
        let gain_db = clamp_eq(gain_db);
        self.bands[band.index()] = gain_db;
        let _ = self
            .tx
            .try_send(AudioCommand::SetEqBand(self.deck, band, gain_db));
    }

    fn band(&self, band: EqBand) -> f32 {
        self.bands[band.index()]
    }

    fn connect(&mut self) {
        self.connected = true;
        let _ = self.tx.try_send(AudioCommand::SetEqConnected(self.deck, true));
    }

    fn disconnect(&mut self) {
        self.connected = false;
        let _ = self
            .tx
            .try_send(AudioCommand::SetEqConnected(self.deck, false));
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// [`DeckBackend`] over the engine's command channel
///
/// `ended` is raised by the audio thread and cleared here whenever the deck
/// moves the playhead, so a stale end flag never outlives a seek or reload.
pub struct EngineDeckBackend {
    deck: DeckId,
    tx: Sender<AudioCommand>,
    telemetry: Arc<VoiceTelemetry>,
    pipeline: RemotePipeline,
    duration: f64,
    attached: bool,
    fault: Option<String>,
}

impl EngineDeckBackend {
    fn send(&mut self, cmd: AudioCommand) -> Result<(), BackendError> {
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.fault = Some("Audio command queue full".to_string());
                Err(BackendError::Refused("command queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.fault = Some(BackendError::Disconnected.to_string());
                Err(BackendError::Disconnected)
            }
        }
    }
}

impl DeckBackend for EngineDeckBackend {
    fn attach(&mut self, audio: Arc<DecodedAudio>) -> Result<(), BackendError> {
        self.duration = audio.duration();
        self.send(AudioCommand::Attach(self.deck, audio))?;
        self.attached = true;
        self.telemetry.set_ended(false);
        self.telemetry.set_position(0.0);
        Ok(())
    }

    fn detach(&mut self) {
        self.attached = false;
        self.duration = 0.0;
        let _ = self.send(AudioCommand::Detach(self.deck));
    }

    fn play(&mut self) -> Result<(), BackendError> {
        if !self.attached {
            return Err(BackendError::NoSource);
        }
        self.telemetry.set_ended(false);
        self.send(AudioCommand::Play(self.deck))
    }

    fn pause(&mut self) {
        let _ = self.send(AudioCommand::Pause(self.deck));
    }

    fn seek(&mut self, seconds: f64) {
        let seconds = seconds.clamp(0.0, self.duration);
        self.telemetry.set_ended(false);
        self.telemetry.set_position(seconds);
        let _ = self.send(AudioCommand::Seek(self.deck, seconds));
    }

    fn position(&self) -> f64 {
        self.telemetry.position()
    }

    fn has_ended(&self) -> bool {
        self.telemetry.ended()
    }

    fn take_fault(&mut self) -> Option<String> {
        self.fault.take()
    }

    fn set_gain(&mut self, gain: f32) {
        let _ = self.send(AudioCommand::SetGain(self.deck, gain));
    }

    fn set_rate(&mut self, rate: f64) {
        let _ = self.send(AudioCommand::SetRate(self.deck, rate));
    }

    fn pipeline(&mut self) -> &mut dyn AudioPipeline {
        &mut self.pipeline
    }
}
