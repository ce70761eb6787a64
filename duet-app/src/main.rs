//! Duet - play two tracks as a beat-synced mix
//!
//! Loads one track per deck, starts deck A, brings deck B in on the beat and
//! crossfades across to it.

use anyhow::{bail, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use duet_analysis::BEATS_PER_BAR;
use duet_audio::{
    AudioCommand, AudioEngine, DeckId, DeckState, EngineDeckBackend, EngineState, Mixdesk,
    TrackRecord, TransportState, VoiceTelemetry,
};
use duet_library::{AnnotationCache, Config, MediaSource, TrackLoader};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Desk = Mixdesk<EngineDeckBackend, AnnotationCache>;

/// Bars spent crossfading from deck A to deck B
const CROSSFADE_BARS: i64 = 8;
/// Deck A plays alone this long before deck B is brought in
const INTRO: Duration = Duration::from_secs(8);
const LOAD_TIMEOUT: Duration = Duration::from_secs(60);
const TICK: Duration = Duration::from_millis(10);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 2 {
        bail!("usage: duet <track-a> <track-b>");
    }

    let config = Config::load();
    if !Config::config_path().exists() {
        // First run: leave an editable copy of the defaults
        if let Err(e) = config.save() {
            warn!(error = %e, "could not write default config");
        }
    }
    let tracks = [track_from_path(&args[0])?, track_from_path(&args[1])?];

    // Create audio channel
    let (cmd_tx, cmd_rx) = AudioEngine::create_channel();
    let engine = AudioEngine::new(cmd_tx);
    let (rate_tx, rate_rx) = bounded(1);

    let telemetry = engine.telemetry();
    let audio_thread = thread::Builder::new()
        .name("duet-audio".into())
        .spawn(move || run_audio_thread(cmd_rx, telemetry, rate_tx))
        .context("failed to spawn audio thread")?;

    let sample_rate = match rate_rx.recv() {
        Ok(Ok(rate)) => rate,
        Ok(Err(e)) => bail!(e),
        Err(_) => bail!("audio thread exited before starting"),
    };
    info!(sample_rate, "audio output started");

    let cache_path = config.database_path();
    let cache = AnnotationCache::open(&cache_path)
        .with_context(|| format!("failed to open {}", cache_path.display()))?;
    for track in &tracks {
        if let Err(e) = cache.register_track(&config.room, track) {
            warn!(track = %track.id, error = %e, "could not register track");
        }
    }

    if let Ok(count) = cache.count() {
        info!(tracks = count, room = %config.room, "annotation store open");
    }

    let source = MediaSource::new(
        config.media_dir(),
        TrackLoader::with_sample_rate(sample_rate),
    );
    let mut desk = Mixdesk::new(
        engine.deck_backend(DeckId::A),
        engine.deck_backend(DeckId::B),
        Arc::new(source),
        cache,
        config.mixdesk_options(),
    );

    let result = run_mix(&mut desk, tracks);
    if let Err(ref e) = result {
        error!(error = %e, "mix stopped");
    }

    drop(desk);
    engine.shutdown();
    if audio_thread.join().is_err() {
        warn!("audio thread panicked");
    }
    result
}

/// Track record for a local file
fn track_from_path(arg: &str) -> anyhow::Result<TrackRecord> {
    let path = std::fs::canonicalize(arg).with_context(|| format!("cannot open {}", arg))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| arg.to_string());

    Ok(TrackRecord {
        id: name.clone(),
        title: name,
        source_uri: Some(format!("file://{}", path.display())),
        ..Default::default()
    })
}

fn run_mix(desk: &mut Desk, tracks: [TrackRecord; 2]) -> anyhow::Result<()> {
    let [track_a, track_b] = tracks;
    desk.set_crossfader(-1.0);
    desk.load(DeckId::A, track_a);
    desk.load(DeckId::B, track_b);

    // Wait for both decks to finish loading
    let started = Instant::now();
    loop {
        desk.tick(Instant::now());
        let a = desk.deck(DeckId::A);
        let b = desk.deck(DeckId::B);
        for (id, deck) in [(DeckId::A, a), (DeckId::B, b)] {
            if deck.transport == TransportState::Error {
                bail!(
                    "deck {} failed to load: {}",
                    id,
                    deck.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        if a.has_track() && b.has_track() {
            break;
        }
        if started.elapsed() > LOAD_TIMEOUT {
            bail!("timed out loading tracks");
        }
        thread::sleep(TICK);
    }

    for id in DeckId::ALL {
        log_deck(id, desk.deck(id));
    }

    if !desk.play(DeckId::A) {
        bail!("deck A refused to play");
    }
    wait(desk, INTRO);

    if desk.can_sync_and_play(DeckId::B) {
        desk.sync_and_play(DeckId::B, Instant::now());
        info!(rate = desk.deck(DeckId::B).rate, "deck B synced to deck A");
    } else {
        warn!("no beat grid to sync with, starting deck B unsynced");
        desk.play(DeckId::B);
    }

    let bpm = desk
        .deck(DeckId::A)
        .effective_bpm()
        .filter(|b| *b > 0.0)
        .unwrap_or(120.0);
    let fade = Duration::from_secs_f64((CROSSFADE_BARS * BEATS_PER_BAR) as f64 * 60.0 / bpm);
    info!(seconds = fade.as_secs_f64(), "crossfading to deck B");

    let fade_start = Instant::now();
    let mut next_status = Instant::now();
    loop {
        let now = Instant::now();
        let progress = (now - fade_start).as_secs_f64() / fade.as_secs_f64();
        desk.set_crossfader((progress.min(1.0) * 2.0 - 1.0) as f32);
        desk.tick(now);

        if now >= next_status {
            next_status = now + Duration::from_secs(1);
            log_status(desk);
        }

        if !desk.deck(DeckId::A).is_playing() {
            break;
        }
        thread::sleep(TICK);
    }

    info!("mix finished");
    for id in DeckId::ALL {
        desk.stop(id);
    }
    Ok(())
}

fn wait(desk: &mut Desk, duration: Duration) {
    let until = Instant::now() + duration;
    while Instant::now() < until {
        desk.tick(Instant::now());
        thread::sleep(TICK);
    }
}

fn log_deck(id: DeckId, deck: &DeckState) {
    info!(
        deck = %id,
        track = deck.track_id().unwrap_or("-"),
        duration = deck.duration,
        bpm = ?deck.bpm,
        first_beat = ?deck.first_beat_time,
        grid = ?deck.grid_source,
        "deck ready"
    );
    if let Some(ref err) = deck.detection_error {
        warn!(deck = %id, error = %err, "beat detection failed");
    }
}

fn log_status(desk: &Desk) {
    for id in DeckId::ALL {
        let deck = desk.deck(id);
        let beat = bar_beat(deck);
        info!(
            deck = %id,
            state = ?deck.transport,
            time = %format!("{:.2}", deck.current_time),
            beat = ?beat,
            volume = %format!("{:.2}", desk.effective_volume(id)),
            "status"
        );
    }
}

/// Beat of the bar (1..=4) the playhead is nearest to
fn bar_beat(deck: &DeckState) -> Option<i64> {
    deck.grid().map(|g| g.beat_in_bar(deck.current_time))
}

/// Run the audio output stream and apply engine commands
fn run_audio_thread(
    cmd_rx: Receiver<AudioCommand>,
    telemetry: [Arc<VoiceTelemetry>; 2],
    rate_tx: Sender<Result<u32, String>>,
) {
    // Get audio host and device
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = rate_tx.send(Err("No audio output device found".into()));
            return;
        }
    };

    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = rate_tx.send(Err(format!("Failed to get audio config: {}", e)));
            return;
        }
    };

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    let engine_state = Arc::new(Mutex::new(EngineState::new(sample_rate, telemetry)));
    let engine_for_callback = Arc::clone(&engine_state);

    // Pre-allocate mono conversion buffer (avoid allocation in audio callback)
    let mut mono_conversion_buffer = vec![0.0f32; 16384];

    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            // On contention output silence rather than blocking
            let Some(mut state) = engine_for_callback.try_lock() else {
                data.fill(0.0);
                return;
            };
            if channels == 2 {
                state.process(data);
            } else {
                let frames = (data.len() / channels.max(1)).min(mono_conversion_buffer.len() / 2);
                let stereo = &mut mono_conversion_buffer[..frames * 2];
                state.process(stereo);
                for (frame, out) in data.chunks_mut(channels.max(1)).take(frames).enumerate() {
                    let mono = (stereo[frame * 2] + stereo[frame * 2 + 1]) * 0.5;
                    out.fill(mono);
                }
            }
        },
        |err| {
            error!(error = %err, "audio stream error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = rate_tx.send(Err(format!("Failed to create audio stream: {}", e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = rate_tx.send(Err(format!("Failed to start audio: {}", e)));
        return;
    }
    let _ = rate_tx.send(Ok(sample_rate));

    // Command processing loop
    loop {
        match cmd_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(AudioCommand::Shutdown) => break,
            Ok(cmd) => engine_state.lock().handle_command(cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
