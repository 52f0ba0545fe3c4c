use serde::{Deserialize, Serialize};

use super::crossfade::DeckId;
use crate::queue::QueueItem;

/// Deck playback states, reported to the operator view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckState {
    Idle,
    Loaded,
    Playing,
    Paused,
    FadingOut,
}

/// Notifications a media backend raises between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Loaded { duration: Option<f64> },
    Playing,
    Paused,
    Ended,
    Error(String),
}

/// Media decks collaborator: one physical playback slot.
///
/// Implementations own the actual media element. Positions and durations
/// are in seconds of media time.
pub trait MediaDeck: Send {
    fn load(&mut self, url: &str) -> Result<(), String>;
    fn play(&mut self) -> Result<(), String>;
    fn pause(&mut self);
    /// Drop the source. The deck reports no source afterwards.
    fn unload(&mut self);
    fn seek(&mut self, position: f64);
    fn set_volume(&mut self, volume: f64);
    fn volume(&self) -> f64;
    fn set_rate(&mut self, rate: f64);
    fn rate(&self) -> f64;
    fn set_preserves_pitch(&mut self, preserve: bool);
    fn preserves_pitch(&self) -> bool;
    fn position(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn source(&self) -> Option<String>;
    fn is_paused(&self) -> bool;
    /// Drain events raised since the last call.
    fn poll_events(&mut self) -> Vec<MediaEvent>;
}

/// Source, position, rate and volume of a deck, for handing a running
/// item over to another slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckHandoff {
    pub source: String,
    pub position: f64,
    pub rate: f64,
    pub volume: f64,
}

/// Per-deck playback control and state.
///
/// The deck tracks which queue item it holds; the media backend does the
/// actual decoding and output.
pub struct Deck {
    pub id: DeckId,
    pub state: DeckState,
    /// Item loaded on this deck, if any. Manual overlay URLs have none.
    pub item: Option<QueueItem>,
    media: Box<dyn MediaDeck>,
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("item", &self.item.as_ref().map(|i| i.id))
            .finish()
    }
}

impl Deck {
    pub fn new(id: DeckId, mut media: Box<dyn MediaDeck>) -> Self {
        media.set_preserves_pitch(false);
        Self {
            id,
            state: DeckState::Idle,
            item: None,
            media,
        }
    }

    /// Load a queue item. Replaces whatever the deck held.
    pub fn load(&mut self, item: &QueueItem) -> Result<(), String> {
        let url = item
            .url
            .as_deref()
            .ok_or_else(|| format!("'{}' has no media URL", item.title))?;
        self.load_url(url)?;
        self.item = Some(item.clone());
        Ok(())
    }

    /// Load a bare URL with no queue item attached.
    pub fn load_url(&mut self, url: &str) -> Result<(), String> {
        self.item = None;
        self.media.pause();
        self.media.set_preserves_pitch(false);
        if let Err(e) = self.media.load(url) {
            self.media.unload();
            self.state = DeckState::Idle;
            return Err(format!("{} failed to load {}: {}", self.id, url, e));
        }
        self.media.set_volume(1.0);
        self.state = DeckState::Loaded;
        Ok(())
    }

    pub fn play(&mut self) -> Result<(), String> {
        match self.state {
            DeckState::Loaded | DeckState::Paused | DeckState::Playing => {
                self.media
                    .play()
                    .map_err(|e| format!("{} failed to play: {}", self.id, e))?;
                self.state = DeckState::Playing;
                Ok(())
            }
            DeckState::FadingOut => Ok(()),
            DeckState::Idle => Err(format!("{} has nothing loaded", self.id)),
        }
    }

    pub fn pause(&mut self) {
        if matches!(self.state, DeckState::Playing | DeckState::FadingOut) {
            self.media.pause();
            self.state = DeckState::Paused;
        }
    }

    /// Pause, clear the source, restore full volume and forget the item.
    pub fn stop(&mut self) {
        self.media.pause();
        self.media.unload();
        self.media.set_volume(1.0);
        self.item = None;
        self.state = DeckState::Idle;
    }

    pub fn set_fading(&mut self) {
        if self.state == DeckState::Playing {
            self.state = DeckState::FadingOut;
        }
    }

    pub fn seek(&mut self, position: f64) {
        if self.has_source() {
            self.media.seek(position.max(0.0));
        }
    }

    pub fn has_source(&self) -> bool {
        self.media.source().is_some()
    }

    pub fn source(&self) -> Option<String> {
        self.media.source()
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, DeckState::Playing | DeckState::FadingOut) && !self.media.is_paused()
    }

    pub fn is_paused(&self) -> bool {
        self.media.is_paused()
    }

    pub fn position(&self) -> f64 {
        self.media.position()
    }

    /// Media duration once known, else the duration the queue item carried.
    pub fn duration(&self) -> Option<f64> {
        self.media
            .duration()
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| self.item.as_ref().and_then(|i| i.duration))
    }

    pub fn volume(&self) -> f64 {
        self.media.volume()
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.media.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn rate(&self) -> f64 {
        self.media.rate()
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.media.set_preserves_pitch(false);
        self.media.set_rate(rate);
    }

    pub fn preserves_pitch(&self) -> bool {
        self.media.preserves_pitch()
    }

    pub fn holds(&self, item: &QueueItem) -> bool {
        self.item.as_ref().is_some_and(|i| i.id == item.id)
    }

    pub fn handoff(&self) -> Option<DeckHandoff> {
        Some(DeckHandoff {
            source: self.media.source()?,
            position: self.media.position(),
            rate: self.media.rate(),
            volume: self.media.volume(),
        })
    }

    /// Resume another deck's running source here.
    pub fn take_over(&mut self, from: &DeckHandoff, item: Option<QueueItem>) -> Result<(), String> {
        self.load_url(&from.source)?;
        self.media.seek(from.position);
        self.set_rate(from.rate);
        self.media.set_volume(from.volume);
        self.item = item;
        self.play()
    }

    /// Drain backend events. A known duration is copied onto the item.
    pub fn poll_events(&mut self) -> Vec<MediaEvent> {
        let events = self.media.poll_events();
        for event in &events {
            match event {
                MediaEvent::Loaded { duration: Some(d) } => {
                    if let Some(item) = self.item.as_mut() {
                        item.duration = Some(*d);
                    }
                }
                MediaEvent::Ended => {
                    if self.state != DeckState::Idle {
                        self.state = DeckState::Paused;
                    }
                }
                _ => {}
            }
        }
        events
    }
}
