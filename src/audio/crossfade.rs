use serde::{Deserialize, Serialize};

use crate::queue::ItemId;

// ── DeckId ────────────────────────────────────────────────────────────────────

/// Playback slot identifier used throughout the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckId {
    DeckA,
    DeckB,
    Overlay,
}

impl DeckId {
    /// Main deck for a slot index (0 = A, 1 = B).
    pub fn main(slot: usize) -> Self {
        if slot == 0 {
            DeckId::DeckA
        } else {
            DeckId::DeckB
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::DeckA => write!(f, "deck_a"),
            DeckId::DeckB => write!(f, "deck_b"),
            DeckId::Overlay => write!(f, "overlay"),
        }
    }
}

// ── FadeRamp ──────────────────────────────────────────────────────────────────

/// Linear per-tick volume ramp. The outgoing deck loses `step` of volume
/// every playback tick and is released once it is at or below `floor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FadeRamp {
    pub step: f64,
    pub floor: f64,
}

impl Default for FadeRamp {
    fn default() -> Self {
        Self {
            step: 0.06,
            floor: 0.02,
        }
    }
}

impl FadeRamp {
    /// Next volume and whether the fade is finished.
    pub fn next(&self, volume: f64) -> (f64, bool) {
        let v = (volume - self.step).max(0.0);
        (v, v <= self.floor)
    }
}

// ── CrossfadeState ────────────────────────────────────────────────────────────

/// Fade in progress on the main decks.
///
/// A crossfade has an incoming deck already playing the next item at full
/// volume; a fade to silence has none.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CrossfadeState {
    #[default]
    Idle,
    Fading {
        outgoing: usize,
        incoming: Option<usize>,
        next_item: Option<ItemId>,
    },
}

impl CrossfadeState {
    pub fn crossfade(outgoing: usize, incoming: usize, next_item: ItemId) -> Self {
        CrossfadeState::Fading {
            outgoing,
            incoming: Some(incoming),
            next_item: Some(next_item),
        }
    }

    pub fn to_silence(outgoing: usize) -> Self {
        CrossfadeState::Fading {
            outgoing,
            incoming: None,
            next_item: None,
        }
    }

    /// The outgoing slot, if a fade is in progress.
    pub fn outgoing(&self) -> Option<usize> {
        match self {
            CrossfadeState::Fading { outgoing, .. } => Some(*outgoing),
            CrossfadeState::Idle => None,
        }
    }

    /// The incoming slot, if a crossfade is in progress.
    pub fn incoming(&self) -> Option<usize> {
        match self {
            CrossfadeState::Fading { incoming, .. } => *incoming,
            CrossfadeState::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CrossfadeState::Idle)
    }

    pub fn is_fading(&self) -> bool {
        matches!(self, CrossfadeState::Fading { .. })
    }

    /// Take the current state, leaving `Idle` behind.
    pub fn take(&mut self) -> CrossfadeState {
        std::mem::take(self)
    }

    pub fn reset(&mut self) {
        *self = CrossfadeState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_releases_at_floor() {
        let ramp = FadeRamp::default();
        let (v, done) = ramp.next(0.07);
        assert!((v - 0.01).abs() < 1e-9);
        assert!(done);
        let (_, done) = ramp.next(0.1);
        assert!(!done, "0.04 is still above the floor");
        let (v, done) = ramp.next(1.0);
        assert!((v - 0.94).abs() < 1e-9);
        assert!(!done);
    }

    #[test]
    fn ramp_never_goes_negative() {
        let (v, done) = FadeRamp::default().next(0.01);
        assert_eq!(v, 0.0);
        assert!(done);
    }

    #[test]
    fn full_fade_takes_seventeen_ticks() {
        let ramp = FadeRamp::default();
        let mut volume = 1.0;
        let mut ticks = 0;
        loop {
            let (next, done) = ramp.next(volume);
            ticks += 1;
            if done {
                break;
            }
            volume = next;
        }
        assert_eq!(ticks, 17);
    }

    #[test]
    fn state_accessors() {
        let mut state = CrossfadeState::crossfade(0, 1, ItemId(7));
        assert!(state.is_fading());
        assert_eq!(state.outgoing(), Some(0));
        assert_eq!(state.incoming(), Some(1));
        let taken = state.take();
        assert!(state.is_idle());
        assert!(taken.is_fading());
        assert_eq!(CrossfadeState::to_silence(1).incoming(), None);
    }

    #[test]
    fn deck_id_display() {
        assert_eq!(DeckId::main(0).to_string(), "deck_a");
        assert_eq!(DeckId::main(1).to_string(), "deck_b");
        assert_eq!(DeckId::Overlay.to_string(), "overlay");
    }
}
