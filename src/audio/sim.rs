//! Clock-driven stand-in for a real media element.
//!
//! Position is derived from the shared [`Clock`], so advancing a
//! `ManualClock` moves every playing deck forward together.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::deck::{MediaDeck, MediaEvent};
use crate::clock::Clock;

/// Durations used when a URL was never registered.
pub const DEFAULT_SIM_DURATION: f64 = 180.0;

#[derive(Debug, Default)]
struct CatalogInner {
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    /// URLs whose next playing deck reports an error.
    erroring: HashSet<String>,
}

/// Media lookup shared by all simulated decks of a session.
#[derive(Debug, Clone, Default)]
pub struct SimCatalog {
    inner: Arc<Mutex<CatalogInner>>,
}

impl SimCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, duration: f64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.durations.insert(url.to_string(), duration);
        }
    }

    /// Loading `url` will fail from now on.
    pub fn fail(&self, url: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(url.to_string());
        }
    }

    /// The next deck found playing `url` emits a playback error once.
    pub fn fail_during_play(&self, url: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.erroring.insert(url.to_string());
        }
    }

    fn take_playback_error(&self, url: &str) -> bool {
        self.inner
            .lock()
            .map(|mut inner| inner.erroring.remove(url))
            .unwrap_or(false)
    }

    fn lookup(&self, url: &str) -> Result<f64, String> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| format!("Catalog lock poisoned: {}", e))?;
        if inner.failing.contains(url) {
            return Err(format!("unsupported media: {}", url));
        }
        Ok(inner
            .durations
            .get(url)
            .copied()
            .unwrap_or(DEFAULT_SIM_DURATION))
    }
}

pub struct SimulatedDeck {
    clock: Arc<dyn Clock>,
    catalog: SimCatalog,
    source: Option<String>,
    duration: Option<f64>,
    /// Position at `anchor`.
    base: f64,
    /// Clock time when playback last (re)started, while playing.
    anchor: Option<f64>,
    volume: f64,
    rate: f64,
    preserves_pitch: bool,
    events: Vec<MediaEvent>,
}

impl SimulatedDeck {
    pub fn new(clock: Arc<dyn Clock>, catalog: SimCatalog) -> Self {
        Self {
            clock,
            catalog,
            source: None,
            duration: None,
            base: 0.0,
            anchor: None,
            volume: 1.0,
            rate: 1.0,
            preserves_pitch: true,
            events: Vec::new(),
        }
    }

    fn raw_position(&self) -> f64 {
        match self.anchor {
            Some(start) => self.base + (self.clock.now() - start).max(0.0) * self.rate,
            None => self.base,
        }
    }

    /// Freeze the running position into `base`.
    fn rebase(&mut self) {
        if self.anchor.is_some() {
            self.base = self.raw_position();
            self.anchor = Some(self.clock.now());
        }
    }
}

impl MediaDeck for SimulatedDeck {
    fn load(&mut self, url: &str) -> Result<(), String> {
        let duration = self.catalog.lookup(url)?;
        self.source = Some(url.to_string());
        self.duration = Some(duration);
        self.base = 0.0;
        self.anchor = None;
        self.events.push(MediaEvent::Loaded {
            duration: Some(duration),
        });
        Ok(())
    }

    fn play(&mut self) -> Result<(), String> {
        if self.source.is_none() {
            return Err("no source".to_string());
        }
        if self.anchor.is_none() {
            self.anchor = Some(self.clock.now());
            self.events.push(MediaEvent::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.anchor.is_some() {
            self.base = self.raw_position();
            self.anchor = None;
            self.events.push(MediaEvent::Paused);
        }
    }

    fn unload(&mut self) {
        self.source = None;
        self.duration = None;
        self.base = 0.0;
        self.anchor = None;
    }

    fn seek(&mut self, position: f64) {
        self.base = position;
        if self.anchor.is_some() {
            self.anchor = Some(self.clock.now());
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_rate(&mut self, rate: f64) {
        self.rebase();
        self.rate = rate;
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn set_preserves_pitch(&mut self, preserve: bool) {
        self.preserves_pitch = preserve;
    }

    fn preserves_pitch(&self) -> bool {
        self.preserves_pitch
    }

    fn position(&self) -> f64 {
        let pos = self.raw_position();
        match self.duration {
            Some(d) => pos.min(d),
            None => pos,
        }
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn source(&self) -> Option<String> {
        self.source.clone()
    }

    fn is_paused(&self) -> bool {
        self.anchor.is_none()
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        if let (Some(_), Some(url)) = (self.anchor, self.source.as_deref()) {
            if self.catalog.take_playback_error(url) {
                self.base = self.raw_position();
                self.anchor = None;
                self.events.push(MediaEvent::Error(format!("decode error in {}", url)));
            }
        }
        if let (Some(_), Some(d)) = (self.anchor, self.duration) {
            if self.raw_position() >= d {
                self.base = d;
                self.anchor = None;
                self.events.push(MediaEvent::Ended);
            }
        }
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn sim(clock: &ManualClock, catalog: &SimCatalog) -> SimulatedDeck {
        SimulatedDeck::new(Arc::new(clock.clone()), catalog.clone())
    }

    #[test]
    fn position_follows_clock_and_rate() {
        let clock = ManualClock::new();
        let catalog = SimCatalog::new();
        let mut deck = sim(&clock, &catalog);
        deck.load("x").unwrap();
        deck.play().unwrap();
        clock.advance(10.0);
        assert!((deck.position() - 10.0).abs() < 1e-9);
        deck.set_rate(2.0);
        clock.advance(1.0);
        assert!((deck.position() - 12.0).abs() < 1e-9);
        deck.pause();
        clock.advance(5.0);
        assert!((deck.position() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn ended_fires_once_at_duration() {
        let clock = ManualClock::new();
        let catalog = SimCatalog::new();
        catalog.insert("short", 3.0);
        let mut deck = sim(&clock, &catalog);
        deck.load("short").unwrap();
        deck.play().unwrap();
        deck.poll_events();
        clock.advance(3.5);
        assert_eq!(deck.poll_events(), vec![MediaEvent::Ended]);
        assert!(deck.poll_events().is_empty());
        assert_eq!(deck.position(), 3.0);
    }

    #[test]
    fn injected_playback_error_fires_once_and_halts() {
        let clock = ManualClock::new();
        let catalog = SimCatalog::new();
        let mut deck = sim(&clock, &catalog);
        deck.load("glitch").unwrap();
        deck.play().unwrap();
        deck.poll_events();
        catalog.fail_during_play("glitch");
        clock.advance(2.0);
        let events = deck.poll_events();
        assert!(matches!(events.as_slice(), [MediaEvent::Error(_)]));
        assert!(deck.is_paused());
        assert!(deck.poll_events().is_empty());
    }

    #[test]
    fn failing_urls_do_not_load() {
        let clock = ManualClock::new();
        let catalog = SimCatalog::new();
        catalog.fail("broken");
        let mut deck = sim(&clock, &catalog);
        assert!(deck.load("broken").is_err());
        assert!(deck.source().is_none());
    }
}
