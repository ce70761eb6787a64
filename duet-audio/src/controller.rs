//! Deck engine - the per-deck transport state machine
//!
//! `Empty → Loading → Ready ⇄ Playing ⇄ Paused`, with stop collapsing back
//! into `Ready` at time 0 and `Error` reachable from loading or playback.
//! The engine owns the deck's backend; the `DeckState` it drives lives in the
//! `DeckStore` and is passed in on every command.

use crate::backend::{DeckBackend, DecodedAudio};
use crate::cancel::CancelToken;
use crate::deck::{
    clamp_eq, clamp_rate, clamp_volume, CueKind, DeckId, DeckState, GridSource, TrackRecord,
    TransportState,
};
use crate::eq::EqBand;
use crate::loading::{LoadOutcome, LoadTicket};
use crate::mixer::effective_volume;
use crate::persist::{AnnotationStore, PersistError, StoredGrid};
use duet_analysis::{BeatDetector, Detection};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a poll tick observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Not polling
    Idle,
    /// Published a new playhead position
    Advanced,
    /// Reached loop end and jumped back to loop start
    LoopedBack,
    /// Ran off the end of the track; deck is back at `Ready`
    Ended,
    /// Backend reported a playback failure; deck is in `Error`
    Faulted,
}

pub struct DeckEngine<B: DeckBackend> {
    id: DeckId,
    backend: B,
    room: String,
    /// Bumped on every load and unload
    generation: u64,
    token: CancelToken,
    /// Token the running poll loop is bound to
    poll: Option<CancelToken>,
    audio: Option<Arc<DecodedAudio>>,
}

impl<B: DeckBackend> DeckEngine<B> {
    pub fn new(id: DeckId, backend: B, room: impl Into<String>) -> Self {
        Self {
            id,
            backend,
            room: room.into(),
            generation: 0,
            token: CancelToken::new(),
            poll: None,
            audio: None,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The deck's live cancellation token
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn audio(&self) -> Option<&Arc<DecodedAudio>> {
        self.audio.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Cancel everything bound to the current token
    fn invalidate(&mut self) {
        self.token.renew();
        self.poll = None;
    }

    /// Start loading a track: supersede any pending load and enter `Loading`
    ///
    /// The returned ticket must accompany the load result back into
    /// [`DeckEngine::apply_load`].
    pub fn begin_load(&mut self, state: &mut DeckState, track: TrackRecord) -> LoadTicket {
        self.invalidate();
        self.generation += 1;
        self.backend.pause();
        self.backend.detach();
        self.audio = None;

        info!(deck = %self.id, track = %track.id, title = %track.title, "loading track");

        *state = DeckState {
            volume: state.volume,
            rate: state.rate,
            eq_low: state.eq_low,
            eq_mid: state.eq_mid,
            eq_high: state.eq_high,
            bpm: track.bpm,
            track: Some(track),
            transport: TransportState::Loading,
            loading: true,
            ..DeckState::default()
        };

        LoadTicket {
            deck: self.id,
            generation: self.generation,
            token: self.token.clone(),
        }
    }

    /// True if a ticket belongs to this deck's most recent load
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.deck == self.id
            && ticket.generation == self.generation
            && !ticket.token.is_cancelled()
    }

    /// Apply a finished load; stale outcomes are dropped and `false` returned
    pub fn apply_load(
        &mut self,
        state: &mut DeckState,
        outcome: LoadOutcome,
        store: &mut dyn AnnotationStore,
    ) -> bool {
        if !self.is_current(&outcome.ticket) || state.track_id() != Some(outcome.track_id.as_str())
        {
            debug!(
                deck = %self.id,
                track = %outcome.track_id,
                generation = outcome.ticket.generation,
                current = self.generation,
                "discarding stale load"
            );
            return false;
        }

        state.loading = false;

        let audio = match outcome.result {
            Ok(audio) => Arc::new(audio),
            Err(e) => {
                warn!(deck = %self.id, track = %outcome.track_id, error = %e, "track load failed");
                state.transport = TransportState::Error;
                state.error = Some(e.to_string());
                return true;
            }
        };

        if let Err(e) = self.backend.attach(Arc::clone(&audio)) {
            warn!(deck = %self.id, error = %e, "backend rejected audio");
            state.transport = TransportState::Error;
            state.error = Some(e.to_string());
            return true;
        }

        self.backend.set_rate(state.rate);
        let pipeline = self.backend.pipeline();
        pipeline.set_band(EqBand::Low, state.eq_low);
        pipeline.set_band(EqBand::Mid, state.eq_mid);
        pipeline.set_band(EqBand::High, state.eq_high);
        pipeline.connect();

        state.transport = TransportState::Ready;
        state.duration = audio.duration();
        state.current_time = 0.0;
        state.error = None;
        self.audio = Some(audio);

        let mut has_grid = false;
        match store.load(&self.room, &outcome.track_id) {
            Ok(Some(saved)) => {
                state.cue_points = saved.cue_points;
                if let Some(grid) = saved.grid {
                    if grid.bpm.is_some() {
                        state.bpm = grid.bpm;
                    }
                    if grid.first_beat_time.is_some() {
                        state.first_beat_time = grid.first_beat_time;
                        state.grid_source = Some(grid.source);
                        has_grid = true;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(deck = %self.id, error = %e, "failed to read track annotations"),
        }

        match outcome.detection {
            Some(Ok(detection)) if has_grid => state.detection = Some(detection),
            Some(Ok(detection)) => self.seed_grid(state, detection, store),
            Some(Err(e)) => state.detection_error = Some(e.to_string()),
            None => {}
        }

        info!(
            deck = %self.id,
            track = %outcome.track_id,
            duration = state.duration,
            bpm = ?state.bpm,
            "track ready"
        );
        true
    }

    /// Start or resume playback
    pub fn play(&mut self, state: &mut DeckState) -> bool {
        if state.is_playing() || !state.has_track() {
            return false;
        }

        if let Err(e) = self.backend.play() {
            warn!(deck = %self.id, error = %e, "playback refused");
            state.error = Some(e.to_string());
            return false;
        }

        state.transport = TransportState::Playing;
        state.error = None;
        self.poll = Some(self.token.clone());
        true
    }

    /// Sample the backend and republish the playhead; call at display rate
    pub fn poll(&mut self, state: &mut DeckState) -> PollEvent {
        let active = matches!(&self.poll, Some(token) if !token.is_cancelled());
        if !active || !state.is_playing() {
            self.poll = None;
            return PollEvent::Idle;
        }

        if let Some(fault) = self.backend.take_fault() {
            warn!(deck = %self.id, error = %fault, "playback failed");
            self.invalidate();
            self.backend.pause();
            state.transport = TransportState::Error;
            state.error = Some(fault);
            return PollEvent::Faulted;
        }

        if self.backend.has_ended() {
            debug!(deck = %self.id, "track ended");
            self.invalidate();
            self.backend.pause();
            self.backend.seek(0.0);
            state.transport = TransportState::Ready;
            state.current_time = 0.0;
            return PollEvent::Ended;
        }

        let position = self.backend.position();
        if state.looping {
            if let Some((start, end)) = state.cue_points.loop_region() {
                if position >= end {
                    self.backend.seek(start);
                    state.current_time = start;
                    return PollEvent::LoopedBack;
                }
            }
        }

        state.current_time = position;
        PollEvent::Advanced
    }

    pub fn pause(&mut self, state: &mut DeckState) -> bool {
        if !state.is_playing() {
            return false;
        }
        self.invalidate();
        self.backend.pause();
        state.transport = TransportState::Paused;
        state.current_time = self.backend.position();
        true
    }

    /// Halt playback and return to the top of the track
    pub fn stop(&mut self, state: &mut DeckState) -> bool {
        if !state.is_playing() {
            return false;
        }
        self.invalidate();
        self.backend.pause();
        self.backend.seek(0.0);
        state.transport = TransportState::Ready;
        state.current_time = 0.0;
        true
    }

    /// Move the playhead; the new time is published immediately
    pub fn seek(&mut self, state: &mut DeckState, time: f64) -> bool {
        if !state.has_track() || !time.is_finite() {
            return false;
        }
        let time = time.clamp(0.0, state.duration);
        self.backend.seek(time);
        state.current_time = time;
        true
    }

    pub fn change_volume(&mut self, state: &mut DeckState, volume: f32, crossfader: f32) {
        state.volume = clamp_volume(volume);
        self.apply_gain(state, crossfader);
    }

    /// Push the deck's post-crossfader gain to the backend
    pub fn apply_gain(&mut self, state: &DeckState, crossfader: f32) {
        self.backend
            .set_gain(effective_volume(self.id, state.volume, crossfader));
    }

    pub fn change_rate(&mut self, state: &mut DeckState, rate: f64) {
        if !rate.is_finite() {
            return;
        }
        state.rate = clamp_rate(rate);
        self.backend.set_rate(state.rate);
    }

    pub fn change_eq(&mut self, state: &mut DeckState, band: EqBand, gain_db: f32) {
        let gain_db = clamp_eq(gain_db);
        match band {
            EqBand::Low => state.eq_low = gain_db,
            EqBand::Mid => state.eq_mid = gain_db,
            EqBand::High => state.eq_high = gain_db,
        }
        self.backend.pipeline().set_band(band, gain_db);
    }

    /// Toggle looping between cue A and cue B; returns the new loop state
    pub fn toggle_loop(&mut self, state: &mut DeckState) -> bool {
        if state.looping {
            state.looping = false;
        } else if state.has_track() && state.cue_points.loop_region().is_some() {
            state.looping = true;
        }
        state.looping
    }

    /// Set (quantized to the grid when one is known) or clear a cue point
    pub fn set_cue_point(
        &mut self,
        state: &mut DeckState,
        kind: CueKind,
        time: Option<f64>,
        store: &mut dyn AnnotationStore,
    ) -> bool {
        if !state.has_track() {
            return false;
        }

        let time = match time {
            Some(t) if !t.is_finite() => return false,
            Some(t) => {
                let t = t.max(0.0);
                Some(state.grid().map(|grid| grid.quantize(t)).unwrap_or(t))
            }
            None => None,
        };

        state.cue_points.set(kind, time);
        if state.looping && state.cue_points.loop_region().is_none() {
            state.looping = false;
        }

        self.persist_cues(state, store);
        true
    }

    pub fn delete_cue_point(
        &mut self,
        state: &mut DeckState,
        kind: CueKind,
        store: &mut dyn AnnotationStore,
    ) -> bool {
        self.set_cue_point(state, kind, None, store)
    }

    /// Place (or clear) the grid anchor by hand
    pub fn set_first_beat(
        &mut self,
        state: &mut DeckState,
        time: Option<f64>,
        store: &mut dyn AnnotationStore,
    ) -> bool {
        if !state.has_track() {
            return false;
        }

        match time {
            Some(t) if !t.is_finite() => return false,
            Some(t) => {
                state.first_beat_time = Some(t.max(0.0));
                state.grid_source = Some(GridSource::Manual);
            }
            None => {
                state.first_beat_time = None;
                state.grid_source = None;
            }
        }

        self.persist_grid(state, store);
        true
    }

    /// Run the beat detector over the loaded audio
    ///
    /// A successful detection seeds the grid unless a DJ placed it by hand.
    /// Failures land in `detection_error` and leave playback alone.
    pub fn run_auto_detect(
        &mut self,
        state: &mut DeckState,
        detector: &BeatDetector,
        store: &mut dyn AnnotationStore,
    ) -> bool {
        let audio = match (&self.audio, state.has_track()) {
            (Some(audio), true) => Arc::clone(audio),
            _ => {
                state.detection_error = Some(duet_analysis::DetectionError::NoAudio.to_string());
                return false;
            }
        };

        let mono = audio.mono(detector.options().max_duration_seconds);
        match detector.detect(&mono, audio.sample_rate) {
            Ok(detection) => {
                info!(
                    deck = %self.id,
                    bpm = detection.bpm,
                    confidence = detection.confidence,
                    "beats detected"
                );
                self.seed_grid(state, detection, store);
                true
            }
            Err(e) => {
                debug!(deck = %self.id, error = %e, "beat detection failed");
                state.detection = None;
                state.detection_error = Some(e.to_string());
                false
            }
        }
    }

    /// Stop, release the audio and return to `Empty`, keeping the volume
    pub fn unload(&mut self, state: &mut DeckState) {
        self.invalidate();
        self.generation += 1;
        self.backend.pause();
        self.backend.detach();
        self.audio = None;

        *state = DeckState::emptied(state.volume);
        self.backend.set_rate(state.rate);
        let pipeline = self.backend.pipeline();
        for band in EqBand::ALL {
            pipeline.set_band(band, 0.0);
        }
        info!(deck = %self.id, "deck unloaded");
    }

    fn seed_grid(
        &mut self,
        state: &mut DeckState,
        detection: Detection,
        store: &mut dyn AnnotationStore,
    ) {
        state.detection_error = None;
        let manual = state.grid_source == Some(GridSource::Manual) && state.first_beat_time.is_some();
        if !manual {
            state.first_beat_time = Some(detection.first_beat_time);
            if state.bpm.is_none() {
                state.bpm = Some(detection.bpm);
            }
            state.grid_source = Some(GridSource::Detected);
        } else {
            debug!(deck = %self.id, "keeping hand-placed grid");
        }
        state.detection = Some(detection);

        if !manual {
            self.persist_grid(state, store);
        }
    }

    fn persist_cues(&self, state: &DeckState, store: &mut dyn AnnotationStore) {
        let Some(track_id) = state.track_id() else {
            return;
        };
        let result = store.save_cue_points(&self.room, track_id, &state.cue_points);
        self.log_persist(track_id, "cue points", result);
    }

    fn persist_grid(&self, state: &DeckState, store: &mut dyn AnnotationStore) {
        let Some(track_id) = state.track_id() else {
            return;
        };
        let grid = StoredGrid {
            first_beat_time: state.first_beat_time,
            bpm: state.bpm,
            source: state.grid_source.unwrap_or(GridSource::Manual),
        };
        let result = store.save_beat_grid(&self.room, track_id, &grid);
        self.log_persist(track_id, "beat grid", result);
    }

    fn log_persist(&self, track_id: &str, what: &str, result: Result<(), PersistError>) {
        match result {
            Ok(()) => {}
            Err(PersistError::NotFound(_)) => {
                debug!(deck = %self.id, track = %track_id, "track no longer exists; {what} not saved")
            }
            Err(e) => warn!(deck = %self.id, track = %track_id, error = %e, "failed to save {what}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::MAX_RATE;
    use crate::loading::LoadError;
    use crate::persist::TrackAnnotations;
    use crate::testing::{pulses, silence, track, MemoryStore, MockBackend};

    fn engine() -> DeckEngine<MockBackend> {
        DeckEngine::new(DeckId::A, MockBackend::default(), "room-1")
    }

    fn outcome(ticket: LoadTicket, id: &str, audio: crate::backend::DecodedAudio) -> LoadOutcome {
        LoadOutcome {
            ticket,
            track_id: id.to_string(),
            result: Ok(audio),
            detection: None,
        }
    }

    fn loaded(bpm: Option<f64>) -> (DeckEngine<MockBackend>, DeckState, MemoryStore) {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::with_tracks(&["x"]);
        let ticket = engine.begin_load(&mut state, track("x", bpm));
        assert!(engine.apply_load(&mut state, outcome(ticket, "x", silence(10.0)), &mut store));
        (engine, state, store)
    }

    #[test]
    fn test_load_enters_ready() {
        let mut engine = engine();
        let mut state = DeckState {
            rate: 1.04,
            eq_low: -6.0,
            current_time: 33.0,
            ..Default::default()
        };
        let mut store = MemoryStore::default();

        let ticket = engine.begin_load(&mut state, track("x", Some(128.0)));
        assert_eq!(state.transport, TransportState::Loading);
        assert!(state.loading);
        assert_eq!(state.current_time, 0.0);

        assert!(engine.apply_load(&mut state, outcome(ticket, "x", silence(10.0)), &mut store));
        assert_eq!(state.transport, TransportState::Ready);
        assert!(!state.loading);
        assert!((state.duration - 10.0).abs() < 1e-9);
        assert_eq!(state.bpm, Some(128.0));
        assert!(engine.backend().audio.is_some());
        assert_eq!(engine.backend().rate, 1.04);
        assert_eq!(engine.backend().eq.bands[0], -6.0);
        assert!(engine.backend().eq.connected);
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::default();

        let first = engine.begin_load(&mut state, track("x", Some(120.0)));
        let second = engine.begin_load(&mut state, track("y", Some(126.0)));
        assert!(first.token.is_cancelled());

        assert!(engine.apply_load(&mut state, outcome(second, "y", silence(5.0)), &mut store));
        assert!(!engine.apply_load(&mut state, outcome(first, "x", silence(10.0)), &mut store));

        assert_eq!(state.track_id(), Some("y"));
        assert_eq!(state.bpm, Some(126.0));
        assert!((state.duration - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_failure_enters_error() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let ticket = engine.begin_load(&mut state, track("x", None));
        let failed = LoadOutcome {
            ticket,
            track_id: "x".into(),
            result: Err(LoadError::Decode("bad header".into())),
            detection: None,
        };

        assert!(engine.apply_load(&mut state, failed, &mut MemoryStore::default()));
        assert_eq!(state.transport, TransportState::Error);
        assert!(!state.loading);
        assert!(state.error.as_deref().unwrap().contains("bad header"));
        assert!(!engine.play(&mut state));
    }

    #[test]
    fn test_load_restores_annotations() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::with_tracks(&["x"]);
        store.entries.insert(
            "x".into(),
            TrackAnnotations {
                cue_points: crate::deck::CuePoints {
                    start: Some(1.0),
                    ..Default::default()
                },
                grid: Some(StoredGrid {
                    first_beat_time: Some(0.2),
                    bpm: Some(124.0),
                    source: GridSource::Manual,
                }),
            },
        );

        let ticket = engine.begin_load(&mut state, track("x", None));
        engine.apply_load(&mut state, outcome(ticket, "x", silence(10.0)), &mut store);
        assert_eq!(state.cue_points.start, Some(1.0));
        assert_eq!(state.first_beat_time, Some(0.2));
        assert_eq!(state.bpm, Some(124.0));
        assert_eq!(state.grid_source, Some(GridSource::Manual));
    }

    #[test]
    fn test_load_detection_respects_saved_grid() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::with_tracks(&["x"]);
        store.entries.insert(
            "x".into(),
            TrackAnnotations {
                grid: Some(StoredGrid {
                    first_beat_time: Some(0.3),
                    bpm: Some(121.0),
                    source: GridSource::Manual,
                }),
                ..Default::default()
            },
        );

        let ticket = engine.begin_load(&mut state, track("x", None));
        let mut done = outcome(ticket, "x", silence(10.0));
        done.detection = Some(Ok(Detection {
            first_beat_time: 0.25,
            bpm: 120.0,
            confidence: 1.0,
            beats: vec![0.25, 0.75],
        }));
        engine.apply_load(&mut state, done, &mut store);

        assert_eq!(state.first_beat_time, Some(0.3));
        assert_eq!(state.bpm, Some(121.0));
        assert!(state.detection.is_some());
    }

    #[test]
    fn test_play_pause_stop() {
        let (mut engine, mut state, _) = loaded(Some(120.0));

        assert!(engine.play(&mut state));
        assert!(!engine.play(&mut state));
        assert_eq!(state.transport, TransportState::Playing);
        assert!(engine.is_polling());

        engine.backend_mut().position = 3.5;
        assert!(engine.pause(&mut state));
        assert_eq!(state.transport, TransportState::Paused);
        assert_eq!(state.current_time, 3.5);
        assert!(!engine.is_polling());
        assert!(!engine.pause(&mut state));
        assert!(!engine.stop(&mut state));

        assert!(engine.play(&mut state));
        assert!(engine.stop(&mut state));
        assert_eq!(state.transport, TransportState::Ready);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(engine.backend().position, 0.0);
    }

    #[test]
    fn test_play_without_track_is_noop() {
        let mut engine = engine();
        let mut state = DeckState::default();
        assert!(!engine.play(&mut state));
        assert_eq!(engine.backend().play_calls, 0);
        assert_eq!(state.transport, TransportState::Empty);
    }

    #[test]
    fn test_refused_play_keeps_ready() {
        let (mut engine, mut state, _) = loaded(None);
        engine.backend_mut().refuse_play = Some("device busy".into());

        assert!(!engine.play(&mut state));
        assert_eq!(state.transport, TransportState::Ready);
        assert!(state.error.as_deref().unwrap().contains("device busy"));
        assert!(!engine.is_polling());
    }

    #[test]
    fn test_poll_publishes_position_until_paused() {
        let (mut engine, mut state, _) = loaded(None);
        engine.play(&mut state);

        engine.backend_mut().position = 1.25;
        assert_eq!(engine.poll(&mut state), PollEvent::Advanced);
        assert_eq!(state.current_time, 1.25);

        engine.pause(&mut state);
        engine.backend_mut().position = 9.0;
        assert_eq!(engine.poll(&mut state), PollEvent::Idle);
        assert_eq!(state.current_time, 1.25);
    }

    #[test]
    fn test_end_of_track_returns_to_ready() {
        let (mut engine, mut state, _) = loaded(None);
        engine.play(&mut state);
        engine.backend_mut().ended = true;

        assert_eq!(engine.poll(&mut state), PollEvent::Ended);
        assert_eq!(state.transport, TransportState::Ready);
        assert_eq!(state.current_time, 0.0);
        assert!(!engine.backend().playing);
        assert_eq!(engine.poll(&mut state), PollEvent::Idle);
    }

    #[test]
    fn test_playback_fault_enters_error() {
        let (mut engine, mut state, _) = loaded(None);
        engine.play(&mut state);
        engine.backend_mut().fault = Some("stream lost".into());

        assert_eq!(engine.poll(&mut state), PollEvent::Faulted);
        assert_eq!(state.transport, TransportState::Error);
        assert_eq!(state.error.as_deref(), Some("stream lost"));
    }

    #[test]
    fn test_seek_clamps_and_publishes() {
        let (mut engine, mut state, _) = loaded(None);

        assert!(engine.seek(&mut state, 4.0));
        assert_eq!(state.current_time, 4.0);
        assert_eq!(engine.backend().position, 4.0);

        engine.seek(&mut state, 99.0);
        assert!((state.current_time - 10.0).abs() < 1e-9);
        engine.seek(&mut state, -3.0);
        assert_eq!(state.current_time, 0.0);
        assert!(!engine.seek(&mut state, f64::NAN));
    }

    #[test]
    fn test_controls_are_clamped_and_pushed() {
        let (mut engine, mut state, _) = loaded(None);

        engine.change_rate(&mut state, 1.5);
        assert_eq!(state.rate, MAX_RATE);
        assert_eq!(engine.backend().rate, MAX_RATE);

        engine.change_eq(&mut state, EqBand::High, -20.0);
        assert_eq!(state.eq_high, -12.0);
        assert_eq!(engine.backend().eq.bands[2], -12.0);

        engine.change_volume(&mut state, 1.4, 0.0);
        assert_eq!(state.volume, 1.0);
        assert_eq!(engine.backend().gain, 0.5);

        engine.apply_gain(&state, -1.0);
        assert_eq!(engine.backend().gain, 1.0);
    }

    #[test]
    fn test_cue_point_quantized_and_saved() {
        let (mut engine, mut state, mut store) = loaded(Some(120.0));

        // No anchor yet: stored as given
        engine.set_cue_point(&mut state, CueKind::Start, Some(1.1), &mut store);
        assert_eq!(state.cue_points.start, Some(1.1));

        engine.set_first_beat(&mut state, Some(0.0), &mut store);
        engine.set_cue_point(&mut state, CueKind::A, Some(2.2), &mut store);
        assert_eq!(state.cue_points.a, Some(2.0));
        assert_eq!(store.entries["x"].cue_points.a, Some(2.0));

        engine.delete_cue_point(&mut state, CueKind::A, &mut store);
        assert_eq!(state.cue_points.a, None);
        assert_eq!(store.entries["x"].cue_points.a, None);
    }

    #[test]
    fn test_cue_persistence_failures_are_swallowed() {
        let (mut engine, mut state, mut store) = loaded(None);

        store.known.clear();
        assert!(engine.set_cue_point(&mut state, CueKind::End, Some(8.0), &mut store));
        assert_eq!(state.cue_points.end, Some(8.0));

        store.failure = Some("disk full".into());
        assert!(engine.set_cue_point(&mut state, CueKind::B, Some(9.0), &mut store));
        assert_eq!(state.cue_points.b, Some(9.0));
    }

    #[test]
    fn test_loop_between_cues() {
        let (mut engine, mut state, mut store) = loaded(None);

        assert!(!engine.toggle_loop(&mut state));
        engine.set_cue_point(&mut state, CueKind::A, Some(6.0), &mut store);
        engine.set_cue_point(&mut state, CueKind::B, Some(4.0), &mut store);
        assert!(!engine.toggle_loop(&mut state));

        engine.set_cue_point(&mut state, CueKind::B, Some(8.0), &mut store);
        assert!(engine.toggle_loop(&mut state));

        engine.play(&mut state);
        engine.backend_mut().position = 8.01;
        assert_eq!(engine.poll(&mut state), PollEvent::LoopedBack);
        assert_eq!(state.current_time, 6.0);
        assert_eq!(engine.backend().position, 6.0);

        // Clearing a loop cue ends the loop
        engine.delete_cue_point(&mut state, CueKind::B, &mut store);
        assert!(!state.looping);
    }

    #[test]
    fn test_unload_keeps_volume() {
        let (mut engine, mut state, _) = loaded(Some(120.0));
        state.volume = 0.6;
        engine.change_rate(&mut state, 1.05);
        engine.play(&mut state);
        let token = engine.token().clone();

        engine.unload(&mut state);
        assert!(token.is_cancelled());
        assert_eq!(state.transport, TransportState::Empty);
        assert_eq!(state.volume, 0.6);
        assert_eq!(state.rate, 1.0);
        assert!(state.track.is_none());
        assert!(engine.backend().audio.is_none());
        assert!(engine.audio().is_none());
        assert!(!engine.is_polling());
    }

    #[test]
    fn test_auto_detect_seeds_grid() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::with_tracks(&["x"]);
        let ticket = engine.begin_load(&mut state, track("x", None));
        engine.apply_load(&mut state, outcome(ticket, "x", pulses(10.0, 0.25, 0.5)), &mut store);

        assert!(engine.run_auto_detect(&mut state, &BeatDetector::default(), &mut store));
        let bpm = state.bpm.unwrap();
        assert!((bpm - 120.0).abs() < 0.2);
        assert!((state.first_beat_time.unwrap() - 0.25).abs() < 0.03);
        assert_eq!(state.grid_source, Some(GridSource::Detected));
        assert_eq!(
            store.entries["x"].grid.map(|g| g.source),
            Some(GridSource::Detected)
        );
    }

    #[test]
    fn test_auto_detect_keeps_manual_grid() {
        let mut engine = engine();
        let mut state = DeckState::default();
        let mut store = MemoryStore::with_tracks(&["x"]);
        let ticket = engine.begin_load(&mut state, track("x", Some(120.0)));
        engine.apply_load(&mut state, outcome(ticket, "x", pulses(10.0, 0.25, 0.5)), &mut store);
        engine.set_first_beat(&mut state, Some(1.0), &mut store);

        assert!(engine.run_auto_detect(&mut state, &BeatDetector::default(), &mut store));
        assert!(state.detection.is_some());
        assert_eq!(state.first_beat_time, Some(1.0));
        assert_eq!(state.grid_source, Some(GridSource::Manual));
    }

    #[test]
    fn test_failed_detection_is_reported() {
        let (mut engine, mut state, mut store) = loaded(Some(120.0));

        assert!(!engine.run_auto_detect(&mut state, &BeatDetector::default(), &mut store));
        assert!(state.detection_error.is_some());
        assert_eq!(state.transport, TransportState::Ready);
        assert_eq!(state.first_beat_time, None);
    }

    #[test]
    fn test_auto_detect_without_audio() {
        let mut engine = engine();
        let mut state = DeckState::default();
        assert!(!engine.run_auto_detect(
            &mut state,
            &BeatDetector::default(),
            &mut MemoryStore::default()
        ));
        assert!(state.detection_error.is_some());
    }
}
