//! Tempo and bar-aware phase sync between the two decks

use crate::deck::{clamp_rate, DeckState};
use duet_analysis::BEATS_PER_BAR;

/// Smallest effective BPM difference worth syncing away
const MIN_BPM_DIFFERENCE: f64 = 0.1;

/// Rate change and seek target that line `deck` up with `other`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPlan {
    pub rate: f64,
    pub seek_to: f64,
}

/// Both decks have a track with a known BPM and audibly different tempos
pub fn can_sync(deck: &DeckState, other: &DeckState) -> bool {
    match (tempo(deck), tempo(other)) {
        (Some(a), Some(b)) => (a - b).abs() >= MIN_BPM_DIFFERENCE,
        _ => false,
    }
}

/// Rate that brings `deck` to `other`'s effective BPM, clamped to the pitch range
///
/// When the exact ratio is out of range the nearest achievable rate is
/// returned and the decks stay slightly apart.
pub fn sync_rate(deck: &DeckState, other: &DeckState) -> Option<f64> {
    let bpm = deck.bpm.filter(|b| *b > 0.0)?;
    let target = other.effective_bpm()?;
    Some(clamp_rate(target / bpm))
}

/// `deck` can be started in time with `other`, which is already playing
pub fn can_sync_and_play(deck: &DeckState, other: &DeckState) -> bool {
    deck.has_track()
        && other.has_track()
        && deck.grid().is_some()
        && other.grid().is_some()
        && other.is_playing()
        && !deck.is_playing()
}

/// Plan the rate and start position for playing `deck` in sync with `other`
///
/// Matches `other`'s beat within the bar, choosing the nearer direction
/// (at most two beats either way), and carries over its sub-beat phase.
pub fn plan_sync_and_play(deck: &DeckState, other: &DeckState) -> Option<SyncPlan> {
    if !can_sync_and_play(deck, other) {
        return None;
    }

    let rate = sync_rate(deck, other)?;
    let deck_grid = deck.grid_params()?.with_rate(rate).grid()?;
    let other_grid = other.grid()?;

    let other_phase = other_grid.beat_phase(other.current_time);
    let other_in_bar = other_grid.beat_in_bar(other.current_time);
    let deck_in_bar = deck_grid.beat_in_bar(deck.current_time);

    let mut shift = other_in_bar - deck_in_bar;
    if shift > 2 {
        shift -= BEATS_PER_BAR;
    } else if shift < -2 {
        shift += BEATS_PER_BAR;
    }

    let target_beat = deck_grid.beat_phase(deck.current_time).beat_number + shift;
    let seek_to = deck_grid.beat_time(target_beat) + other_phase.phase * deck_grid.beat_duration();

    Some(SyncPlan {
        rate,
        seek_to: seek_to.max(0.0),
    })
}

fn tempo(state: &DeckState) -> Option<f64> {
    if state.has_track() {
        state.effective_bpm()
    } else {
        None
    }
}
