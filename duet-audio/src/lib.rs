//! Audio engine for Duet - decks, sync, and mixer
//!
//! This module provides the two-deck mixing core:
//! - Deck: State model and the per-deck transport engine
//! - Sync: Tempo matching and bar-aware phase alignment
//! - Mixer: Crossfader gain law and master bus
//! - Engine: Audio-thread rendering behind the deck backend interface
//! - Mixdesk: The session command surface tying it together

mod backend;
mod cancel;
mod console;
mod controller;
mod deck;
mod engine;
mod eq;
mod loading;
mod mixer;
mod persist;
mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use backend::{BackendError, DeckBackend, DecodedAudio};
pub use cancel::CancelToken;
pub use console::{Mixdesk, MixdeskOptions};
pub use controller::{DeckEngine, PollEvent};
pub use deck::{
    clamp_eq, clamp_rate, clamp_volume, CueKind, CuePoints, DeckId, DeckState, GridSource,
    TrackRecord, TransportState, EQ_RANGE_DB, MAX_RATE, MIN_RATE,
};
pub use engine::{AudioCommand, AudioEngine, EngineDeckBackend, EngineState, RemotePipeline, VoiceTelemetry};
pub use eq::{AudioPipeline, EqBand, ThreeBandEq};
pub use loading::{LoadError, LoadOutcome, LoadQueue, LoadTicket, TrackSource};
pub use mixer::{crossfader_gain, effective_volume, Mixer};
pub use persist::{AnnotationStore, PersistError, StoredGrid, TrackAnnotations};
pub use store::DeckStore;
pub use sync::SyncPlan;
