//! Shared state container for both decks and the crossfader

use crate::deck::{DeckId, DeckState};

/// Holds both decks' state and the crossfader position
///
/// Owned by the session and passed by reference; every deck mutation goes
/// through a `DeckEngine` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeckStore {
    a: DeckState,
    b: DeckState,
    /// -1.0 = deck A only, 0.0 = equal mix, 1.0 = deck B only
    crossfader: f32,
}

impl DeckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deck(&self, id: DeckId) -> &DeckState {
        match id {
            DeckId::A => &self.a,
            DeckId::B => &self.b,
        }
    }

    pub(crate) fn deck_mut(&mut self, id: DeckId) -> &mut DeckState {
        match id {
            DeckId::A => &mut self.a,
            DeckId::B => &mut self.b,
        }
    }

    /// A deck together with the opposite one
    pub fn pair(&self, id: DeckId) -> (&DeckState, &DeckState) {
        match id {
            DeckId::A => (&self.a, &self.b),
            DeckId::B => (&self.b, &self.a),
        }
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader
    }

    /// Set crossfader position (-1.0 to 1.0)
    pub fn set_crossfader(&mut self, position: f32) {
        self.crossfader = position.clamp(-1.0, 1.0);
    }
}
