//! Mixdesk - the two-deck session: command surface, crossfader, sync and scheduling
//!
//! All commands run on the owning thread. Loads finish on worker threads and
//! are applied on the next [`Mixdesk::tick`], which also publishes playhead
//! positions and fires delayed sync plays.

use crate::backend::DeckBackend;
use crate::cancel::CancelToken;
use crate::controller::DeckEngine;
use crate::deck::{CueKind, DeckId, DeckState, TrackRecord};
use crate::eq::EqBand;
use crate::loading::{LoadQueue, TrackSource};
use crate::mixer::effective_volume;
use crate::persist::AnnotationStore;
use crate::store::DeckStore;
use crate::sync;
use duet_analysis::{BeatDetector, DetectorOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Session tuning
#[derive(Debug, Clone, PartialEq)]
pub struct MixdeskOptions {
    /// Room the annotations are stored under
    pub room: String,
    /// Wait between the sync seek and the play that follows it
    pub settle_delay: Duration,
    /// Playhead refresh rate while playing
    pub poll_hz: u32,
    /// Run beat detection on every loaded track
    pub auto_detect_on_load: bool,
    pub detector: DetectorOptions,
}

impl Default for MixdeskOptions {
    fn default() -> Self {
        Self {
            room: "default".to_string(),
            settle_delay: Duration::from_millis(50),
            poll_hz: 60,
            auto_detect_on_load: true,
            detector: DetectorOptions::default(),
        }
    }
}

/// Play scheduled after a sync seek
#[derive(Debug)]
struct PendingPlay {
    at: Instant,
    token: CancelToken,
}

pub struct Mixdesk<B: DeckBackend, S: AnnotationStore> {
    decks: DeckStore,
    engine_a: DeckEngine<B>,
    engine_b: DeckEngine<B>,
    store: S,
    loads: LoadQueue,
    detector: BeatDetector,
    options: MixdeskOptions,
    pending: [Option<PendingPlay>; 2],
    next_poll: Option<Instant>,
}

impl<B: DeckBackend, S: AnnotationStore> Mixdesk<B, S> {
    pub fn new(
        backend_a: B,
        backend_b: B,
        source: Arc<dyn TrackSource>,
        store: S,
        options: MixdeskOptions,
    ) -> Self {
        let detector = BeatDetector::new(options.detector);
        let mut loads = LoadQueue::new(source);
        if options.auto_detect_on_load {
            loads = loads.with_detector(detector.clone());
        }

        let mut desk = Self {
            decks: DeckStore::new(),
            engine_a: DeckEngine::new(DeckId::A, backend_a, options.room.clone()),
            engine_b: DeckEngine::new(DeckId::B, backend_b, options.room.clone()),
            store,
            loads,
            detector,
            options,
            pending: [None, None],
            next_poll: None,
        };
        desk.apply_gains();
        desk
    }

    pub fn decks(&self) -> &DeckStore {
        &self.decks
    }

    pub fn deck(&self, id: DeckId) -> &DeckState {
        self.decks.deck(id)
    }

    pub fn engine(&self, id: DeckId) -> &DeckEngine<B> {
        match id {
            DeckId::A => &self.engine_a,
            DeckId::B => &self.engine_b,
        }
    }

    pub fn engine_mut(&mut self, id: DeckId) -> &mut DeckEngine<B> {
        match id {
            DeckId::A => &mut self.engine_a,
            DeckId::B => &mut self.engine_b,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn options(&self) -> &MixdeskOptions {
        &self.options
    }

    /// True while a sync play is waiting for its settle delay
    pub fn has_pending_play(&self, id: DeckId) -> bool {
        self.pending[id.index()].is_some()
    }

    /// Engine, state and store for one deck, borrowed together
    fn split(&mut self, id: DeckId) -> (&mut DeckEngine<B>, &mut DeckState, &mut S) {
        let engine = match id {
            DeckId::A => &mut self.engine_a,
            DeckId::B => &mut self.engine_b,
        };
        (engine, self.decks.deck_mut(id), &mut self.store)
    }

    fn apply_gains(&mut self) {
        let crossfader = self.decks.crossfader();
        self.engine_a.apply_gain(self.decks.deck(DeckId::A), crossfader);
        self.engine_b.apply_gain(self.decks.deck(DeckId::B), crossfader);
    }

    // Transport

    pub fn load(&mut self, id: DeckId, track: TrackRecord) {
        self.pending[id.index()] = None;
        let (engine, state, _) = self.split(id);
        let ticket = engine.begin_load(state, track.clone());
        self.loads.submit(ticket, track);
    }

    pub fn play(&mut self, id: DeckId) -> bool {
        self.pending[id.index()] = None;
        let (engine, state, _) = self.split(id);
        engine.play(state)
    }

    pub fn pause(&mut self, id: DeckId) -> bool {
        self.pending[id.index()] = None;
        let (engine, state, _) = self.split(id);
        engine.pause(state)
    }

    pub fn stop(&mut self, id: DeckId) -> bool {
        self.pending[id.index()] = None;
        let (engine, state, _) = self.split(id);
        engine.stop(state)
    }

    pub fn seek(&mut self, id: DeckId, time: f64) -> bool {
        let (engine, state, _) = self.split(id);
        engine.seek(state, time)
    }

    pub fn unload(&mut self, id: DeckId) {
        self.pending[id.index()] = None;
        let (engine, state, _) = self.split(id);
        engine.unload(state);
    }

    // Channel controls

    pub fn change_volume(&mut self, id: DeckId, volume: f32) {
        let crossfader = self.decks.crossfader();
        let (engine, state, _) = self.split(id);
        engine.change_volume(state, volume, crossfader);
    }

    pub fn change_rate(&mut self, id: DeckId, rate: f64) {
        let (engine, state, _) = self.split(id);
        engine.change_rate(state, rate);
    }

    pub fn change_eq(&mut self, id: DeckId, band: EqBand, gain_db: f32) {
        let (engine, state, _) = self.split(id);
        engine.change_eq(state, band, gain_db);
    }

    pub fn change_eq_low(&mut self, id: DeckId, gain_db: f32) {
        self.change_eq(id, EqBand::Low, gain_db);
    }

    pub fn change_eq_mid(&mut self, id: DeckId, gain_db: f32) {
        self.change_eq(id, EqBand::Mid, gain_db);
    }

    pub fn change_eq_high(&mut self, id: DeckId, gain_db: f32) {
        self.change_eq(id, EqBand::High, gain_db);
    }

    // Cues and loop

    pub fn toggle_loop(&mut self, id: DeckId) -> bool {
        let (engine, state, _) = self.split(id);
        engine.toggle_loop(state)
    }

    pub fn set_cue_point(&mut self, id: DeckId, kind: CueKind, time: Option<f64>) -> bool {
        let (engine, state, store) = self.split(id);
        engine.set_cue_point(state, kind, time, store)
    }

    pub fn delete_cue_point(&mut self, id: DeckId, kind: CueKind) -> bool {
        let (engine, state, store) = self.split(id);
        engine.delete_cue_point(state, kind, store)
    }

    // Crossfader

    /// Move the crossfader (-1.0 = A only, 1.0 = B only)
    pub fn set_crossfader(&mut self, position: f32) {
        self.decks.set_crossfader(position);
        self.apply_gains();
    }

    /// Deck volume after the crossfader
    pub fn effective_volume(&self, id: DeckId) -> f32 {
        effective_volume(id, self.decks.deck(id).volume, self.decks.crossfader())
    }

    // Sync

    pub fn can_sync(&self, id: DeckId) -> bool {
        let (deck, other) = self.decks.pair(id);
        sync::can_sync(deck, other)
    }

    /// Match `id`'s tempo to the other deck
    pub fn sync(&mut self, id: DeckId) -> bool {
        let rate = {
            let (deck, other) = self.decks.pair(id);
            if !sync::can_sync(deck, other) {
                return false;
            }
            match sync::sync_rate(deck, other) {
                Some(rate) => rate,
                None => return false,
            }
        };

        info!(deck = %id, rate, "tempo sync");
        self.change_rate(id, rate);
        true
    }

    pub fn can_sync_and_play(&self, id: DeckId) -> bool {
        let (deck, other) = self.decks.pair(id);
        sync::can_sync_and_play(deck, other)
    }

    /// Sync `id` to the playing deck, seek to the matching bar position and
    /// start it once the settle delay has passed
    pub fn sync_and_play(&mut self, id: DeckId, now: Instant) -> bool {
        let plan = {
            let (deck, other) = self.decks.pair(id);
            match sync::plan_sync_and_play(deck, other) {
                Some(plan) => plan,
                None => return false,
            }
        };

        info!(deck = %id, rate = plan.rate, seek = plan.seek_to, "sync and play");
        let settle = self.options.settle_delay;
        let (engine, state, _) = self.split(id);
        engine.change_rate(state, plan.rate);
        engine.seek(state, plan.seek_to);
        let token = engine.token().clone();

        self.pending[id.index()] = Some(PendingPlay {
            at: now + settle,
            token,
        });
        true
    }

    // Beat grid

    pub fn set_first_beat(&mut self, id: DeckId, time: Option<f64>) -> bool {
        let (engine, state, store) = self.split(id);
        engine.set_first_beat(state, time, store)
    }

    pub fn run_auto_detect(&mut self, id: DeckId) -> bool {
        let engine = match id {
            DeckId::A => &mut self.engine_a,
            DeckId::B => &mut self.engine_b,
        };
        engine.run_auto_detect(self.decks.deck_mut(id), &self.detector, &mut self.store)
    }

    // Scheduling

    /// Apply finished loads, fire due sync plays and refresh playheads
    pub fn tick(&mut self, now: Instant) {
        for outcome in self.loads.drain() {
            let id = outcome.ticket.deck;
            let crossfader = self.decks.crossfader();
            let (engine, state, store) = self.split(id);
            if engine.apply_load(state, outcome, store) {
                engine.apply_gain(state, crossfader);
            }
        }

        for id in DeckId::ALL {
            let Some(pending) = &self.pending[id.index()] else {
                continue;
            };
            let cancelled = pending.token.is_cancelled();
            if !cancelled && now < pending.at {
                continue;
            }

            self.pending[id.index()] = None;
            if cancelled {
                debug!(deck = %id, "sync play cancelled");
            } else {
                let (engine, state, _) = self.split(id);
                engine.play(state);
            }
        }

        if self.next_poll.map_or(true, |at| now >= at) {
            let interval = Duration::from_secs_f64(1.0 / self.options.poll_hz.max(1) as f64);
            self.next_poll = Some(now + interval);
            for id in DeckId::ALL {
                let (engine, state, _) = self.split(id);
                engine.poll(state);
            }
        }
    }
}
