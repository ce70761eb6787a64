//! Background track loading with stale-result protection

use crate::backend::DecodedAudio;
use crate::cancel::CancelToken;
use crate::deck::{DeckId, TrackRecord};
use crossbeam_channel::{unbounded, Receiver, Sender};
use duet_analysis::{BeatDetector, Detection, DetectionError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while fetching and decoding a track
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("No audio source for track {0}")]
    NoSource(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Load cancelled")]
    Cancelled,
    #[error("Load worker failed: {0}")]
    Worker(String),
}

/// Where decoded track audio comes from
pub trait TrackSource: Send + Sync {
    /// Fetch and decode a track; should give up early once `cancel` fires
    fn fetch(&self, track: &TrackRecord, cancel: &CancelToken) -> Result<DecodedAudio, LoadError>;
}

/// Identifies one load request on one deck
#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub deck: DeckId,
    /// Deck load generation at submit time
    pub generation: u64,
    pub token: CancelToken,
}

/// Finished load, successful or not
#[derive(Debug)]
pub struct LoadOutcome {
    pub ticket: LoadTicket,
    pub track_id: String,
    pub result: Result<DecodedAudio, LoadError>,
    /// Beat detection run on the decoded audio, when enabled
    pub detection: Option<Result<Detection, DetectionError>>,
}

/// Runs loads off the command thread and collects their outcomes
pub struct LoadQueue {
    source: Arc<dyn TrackSource>,
    detector: Option<BeatDetector>,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
}

impl LoadQueue {
    pub fn new(source: Arc<dyn TrackSource>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            source,
            detector: None,
            tx,
            rx,
        }
    }

    /// Also run beat detection on every decoded track
    pub fn with_detector(mut self, detector: BeatDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Start loading `track` on a worker thread
    pub fn submit(&self, ticket: LoadTicket, track: TrackRecord) {
        let source = Arc::clone(&self.source);
        let detector = self.detector.clone();
        let tx = self.tx.clone();
        let fallback = (self.tx.clone(), ticket.clone(), track.id.clone());

        let spawned = thread::Builder::new()
            .name(format!("duet-load-{}", ticket.deck))
            .spawn(move || run_job(source.as_ref(), detector.as_ref(), ticket, track, &tx));

        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn load worker");
            let (tx, ticket, track_id) = fallback;
            let _ = tx.send(LoadOutcome {
                ticket,
                track_id,
                result: Err(LoadError::Worker(e.to_string())),
                detection: None,
            });
        }
    }

    /// All outcomes that have arrived so far
    pub fn drain(&self) -> Vec<LoadOutcome> {
        self.rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next outcome
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoadOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

fn run_job(
    source: &dyn TrackSource,
    detector: Option<&BeatDetector>,
    ticket: LoadTicket,
    track: TrackRecord,
    tx: &Sender<LoadOutcome>,
) {
    if ticket.token.is_cancelled() {
        debug!(deck = %ticket.deck, track = %track.id, "load cancelled before start");
        return;
    }

    let result = source.fetch(&track, &ticket.token);

    if ticket.token.is_cancelled() {
        debug!(deck = %ticket.deck, track = %track.id, "dropping cancelled load");
        return;
    }

    let detection = match (&result, detector) {
        (Ok(audio), Some(detector)) => {
            let mono = audio.mono(detector.options().max_duration_seconds);
            Some(detector.detect(&mono, audio.sample_rate))
        }
        _ => None,
    };

    let _ = tx.send(LoadOutcome {
        ticket,
        track_id: track.id,
        result,
        detection,
    });
}
