use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::crossfade::{CrossfadeState, DeckId, FadeRamp};
use super::deck::{Deck, DeckState, MediaDeck, MediaEvent};
use super::sim::{SimCatalog, SimulatedDeck};
use crate::analytics::PlaybackLogger;
use crate::clock::Clock;
use crate::cue::{CueCountdown, CuePoints, UrgencyThresholds, LOOP_TOLERANCE_SECS};
use crate::queue::{ItemId, ItemKind, QueueItem, QueueManager};

/// Half a semitone up.
pub const TOP40_SEMITONES: f64 = 0.5;

pub fn semitone_rate(semitones: f64) -> f64 {
    2f64.powf(semitones / 12.0)
}

/// Playback rate for `item`. Only music gets the Top-40 boost.
pub fn compute_rate(item: &QueueItem, top40: bool, boost_rate: f64) -> f64 {
    if top40 && item.kind == ItemKind::Music {
        boost_rate
    } else {
        1.0
    }
}

/// Who may advance the queue on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Manual mode: cue-driven auto-advance, talk-up and prestart run locally.
    Local,
    /// Automation mode: the planner's timers advance; natural ends still do.
    Planned,
    /// External override: nothing advances, ended items are just cleared.
    Held,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSettings {
    pub ramp: FadeRamp,
    pub top40_rate: f64,
    /// Seconds of slack when deciding to prestart behind a voice track.
    pub prestart_margin: f64,
    /// How close to `loop_out` the loop jumps back.
    pub loop_tolerance: f64,
    pub urgency: UrgencyThresholds,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            ramp: FadeRamp::default(),
            top40_rate: semitone_rate(TOP40_SEMITONES),
            prestart_margin: 0.25,
            loop_tolerance: LOOP_TOLERANCE_SECS,
            urgency: UrgencyThresholds::default(),
        }
    }
}

/// Talk-up overlay that should stop once `for_item` reaches `at`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStop {
    pub at: f64,
    pub for_item: ItemId,
}

/// Two alternating main decks plus the overlay deck.
///
/// The queue owns ordering and the current item; the player only ever
/// consumes from the head.
pub struct DualDeckPlayer {
    decks: [Deck; 2],
    overlay: Deck,
    active: usize,
    fade: CrossfadeState,
    settings: PlayerSettings,
    prestarted: Option<usize>,
    auto_next_triggered: bool,
    top40: bool,
    loop_enabled: bool,
    overlay_stop: Option<OverlayStop>,
    status: Option<String>,
}

impl DualDeckPlayer {
    pub fn new(
        deck_a: Box<dyn MediaDeck>,
        deck_b: Box<dyn MediaDeck>,
        overlay: Box<dyn MediaDeck>,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            decks: [Deck::new(DeckId::DeckA, deck_a), Deck::new(DeckId::DeckB, deck_b)],
            overlay: Deck::new(DeckId::Overlay, overlay),
            active: 0,
            fade: CrossfadeState::Idle,
            settings,
            prestarted: None,
            auto_next_triggered: false,
            top40: false,
            loop_enabled: false,
            overlay_stop: None,
            status: None,
        }
    }

    /// Player backed by three simulated decks sharing `clock`.
    pub fn simulated(clock: Arc<dyn Clock>, catalog: SimCatalog, settings: PlayerSettings) -> Self {
        let make = || -> Box<dyn MediaDeck> {
            Box::new(SimulatedDeck::new(clock.clone(), catalog.clone()))
        };
        Self::new(make(), make(), make(), settings)
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn active_id(&self) -> DeckId {
        DeckId::main(self.active)
    }

    pub fn active_deck(&self) -> &Deck {
        &self.decks[self.active]
    }

    pub fn deck(&self, id: DeckId) -> &Deck {
        match id {
            DeckId::DeckA => &self.decks[0],
            DeckId::DeckB => &self.decks[1],
            DeckId::Overlay => &self.overlay,
        }
    }

    pub fn fade_state(&self) -> &CrossfadeState {
        &self.fade
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_fading()
    }

    pub fn prestarted(&self) -> Option<DeckId> {
        self.prestarted.map(DeckId::main)
    }

    pub fn top40(&self) -> bool {
        self.top40
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn auto_next_triggered(&self) -> bool {
        self.auto_next_triggered
    }

    pub fn overlay_stop(&self) -> Option<OverlayStop> {
        self.overlay_stop
    }

    /// Last operator-facing error, cleared when something starts cleanly.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn position(&self) -> f64 {
        self.decks[self.active].position()
    }

    pub fn rate_for(&self, item: &QueueItem) -> f64 {
        compute_rate(item, self.top40, self.settings.top40_rate)
    }

    /// Countdown for the current item, if it is loaded on the active deck.
    pub fn countdown(&self, queue: &QueueManager) -> Option<CueCountdown> {
        let current = queue.current()?;
        let deck = &self.decks[self.active];
        if !deck.has_source() {
            return None;
        }
        let duration = deck.duration()?;
        Some(CueCountdown::compute(
            &current.cues(),
            deck.position(),
            duration,
            !queue.is_empty(),
            self.settings.urgency,
        ))
    }

    // ── Transport ─────────────────────────────────────────────────────────

    /// Start the item at `index` on `slot` (default: the active deck).
    /// Everything ahead of it is dropped. A stop marker halts playback.
    pub fn start_from(
        &mut self,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        index: usize,
        slot: Option<usize>,
        reason: &str,
    ) {
        let Some(target) = queue.get(index) else {
            return;
        };
        if target.is_stop() {
            queue.take_through(index);
            if let Some(cur) = queue.current() {
                log.end(cur, "stop");
            }
            self.stop_all(queue, log);
            log::info!("Stop marker selected; playback halted");
            return;
        }

        self.fade.reset();
        let slot = slot.unwrap_or(self.active).min(1);
        if let Some(cur) = queue.take_current() {
            log.end(&cur, "skip");
        }
        self.decks[1 - slot].stop();
        self.active = slot;
        self.prestarted = None;
        self.auto_next_triggered = false;

        let Some(item) = queue.take_through(index) else {
            return;
        };
        if !item.cues().has_loop() {
            self.loop_enabled = false;
        }
        self.launch(slot, item, queue, log, reason);
    }

    /// End the current item and start the head of the queue from scratch.
    pub fn play_next(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger, reason: &str) {
        if queue.is_empty() && queue.current().is_none() {
            return;
        }
        if let Some(cur) = queue.current() {
            log.end(cur, reason);
        }
        self.stop_all(queue, log);
        if !queue.is_empty() {
            let slot = self.active;
            self.start_from(queue, log, 0, Some(slot), "auto");
        }
    }

    /// Start the head item on the idle deck at full volume and ramp the
    /// active deck down. The head becomes current when the ramp finishes.
    pub fn fade_and_next(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger, reason: &str) {
        if self.fade.is_fading() {
            self.finish_fade(queue, log);
        }
        let next = match queue.head() {
            Some(head) if !head.is_stop() => head.clone(),
            _ => return self.play_next(queue, log, reason),
        };
        if queue.current().is_none() || !self.decks[self.active].has_source() {
            let slot = self.active;
            return self.start_from(queue, log, 0, Some(slot), reason);
        }

        let outgoing = self.active;
        let incoming = 1 - outgoing;
        if let Err(e) = self.cue_up(incoming, &next) {
            self.abandon(incoming, &next, &e);
            queue.dequeue(next.id);
            self.prestarted = None;
            return;
        }
        self.prestarted = None;
        if let Some(cur) = queue.current() {
            log.end(cur, reason);
        }
        log.start(&next, reason);
        self.decks[outgoing].set_fading();
        self.fade = CrossfadeState::crossfade(outgoing, incoming, next.id);
        self.status = None;
        log::info!(
            "Crossfade {} -> {} into '{}' ({})",
            DeckId::main(outgoing),
            DeckId::main(incoming),
            next.title,
            reason
        );
    }

    /// Hand the running voice track to the overlay deck and switch the main
    /// deck straight to the next item.
    pub fn start_next_with_overlay(
        &mut self,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        reason: &str,
    ) {
        if self.fade.is_fading() {
            self.finish_fade(queue, log);
            // The fade may have put a different item on air.
            if !queue.current().is_some_and(QueueItem::is_overlay_eligible) {
                return;
            }
        }
        let next = match queue.head() {
            None => return self.fade_and_next(queue, log, reason),
            Some(head) if head.is_stop() => return self.play_next(queue, log, reason),
            Some(head) => head.clone(),
        };

        let outgoing = self.active;
        let previous = queue.current().cloned();
        if let Some(handoff) = self.decks[outgoing].handoff() {
            self.stop_overlay(log, "replaced");
            if let Err(e) = self.overlay.take_over(&handoff, previous.clone()) {
                log::warn!("Overlay handoff failed: {}", e);
                self.overlay.stop();
            }
        }
        self.decks[outgoing].stop();

        let Some(next) = queue.dequeue(next.id) else {
            return;
        };
        let incoming = 1 - outgoing;
        self.active = incoming;
        self.prestarted = None;
        self.auto_next_triggered = false;
        queue.take_current();
        if let Some(prev) = &previous {
            log.end(prev, reason);
        }
        self.launch(incoming, next, queue, log, reason);
    }

    /// Ramp the active deck to silence, then unload it and clear current.
    pub fn fade_out_current(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger) {
        if self.fade.is_fading() {
            self.finish_fade(queue, log);
        }
        let outgoing = self.active;
        if !self.decks[outgoing].has_source() {
            return;
        }
        self.decks[outgoing].set_fading();
        self.fade = CrossfadeState::to_silence(outgoing);
        log::info!("Fading out {}", DeckId::main(outgoing));
    }

    /// Pause and unload every deck, including the overlay, and clear current.
    pub fn stop_all(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger) {
        for deck in &mut self.decks {
            deck.stop();
        }
        self.stop_overlay(log, "stop");
        if let Some(cur) = queue.take_current() {
            log.end(&cur, "stop");
        }
        self.fade.reset();
        self.prestarted = None;
        self.auto_next_triggered = false;
    }

    pub fn toggle_pause(&mut self, queue: &QueueManager) {
        if queue.current().is_none() {
            return;
        }
        let deck = &mut self.decks[self.active];
        if !deck.has_source() {
            return;
        }
        if deck.is_paused() {
            if let Err(e) = deck.play() {
                log::warn!("Resume failed: {}", e);
                self.status = Some(e);
            }
        } else {
            deck.pause();
        }
    }

    pub fn set_top40(&mut self, enabled: bool) {
        self.top40 = enabled;
        let boost = self.settings.top40_rate;
        for deck in self.decks.iter_mut().chain(std::iter::once(&mut self.overlay)) {
            if let Some(item) = deck.item.as_ref() {
                let rate = compute_rate(item, enabled, boost);
                deck.set_rate(rate);
            }
        }
    }

    /// Looping needs both loop cues on the current item.
    pub fn set_loop(&mut self, queue: &QueueManager, enabled: bool) -> bool {
        let has_loop = queue.current().is_some_and(|c| c.cues().has_loop());
        self.loop_enabled = enabled && has_loop;
        self.loop_enabled == enabled
    }

    /// Play an arbitrary URL on the overlay deck.
    pub fn play_overlay_url(&mut self, log: &mut PlaybackLogger, url: &str) -> Result<(), String> {
        let url = url.trim();
        if url.is_empty() {
            return Err("Overlay URL is empty".to_string());
        }
        self.stop_overlay(log, "replaced");
        self.overlay.load_url(url)?;
        self.overlay.play()
    }

    /// Pull `id` out of the queue and play it on the overlay deck.
    pub fn play_overlay_item(
        &mut self,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        id: ItemId,
    ) -> bool {
        let Some(item) = queue.dequeue(id) else {
            return false;
        };
        self.stop_overlay(log, "replaced");
        let rate = self.rate_for(&item);
        let started = self.overlay.load(&item).and_then(|_| {
            self.overlay.set_rate(rate);
            self.overlay.play()
        });
        match started {
            Ok(()) => {
                log.start(&item, "overlay");
                log::info!("Overlay playing '{}'", item.title);
                true
            }
            Err(e) => {
                self.abandon_overlay(&item, &e);
                false
            }
        }
    }

    pub fn stop_overlay(&mut self, log: &mut PlaybackLogger, reason: &str) {
        if let Some(item) = self.overlay.item.as_ref() {
            log.end(item, reason);
        }
        self.overlay.stop();
        self.overlay_stop = None;
    }

    // ── Tick ──────────────────────────────────────────────────────────────

    /// One playback tick: drain deck events, step any fade, then run the
    /// cue-driven behaviour `policy` allows. Returns the countdown.
    pub fn tick(
        &mut self,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        policy: AdvancePolicy,
    ) -> Option<CueCountdown> {
        self.poll_decks(queue, log, policy);
        self.step_fade(queue, log);

        let current = queue.current()?.clone();
        let countdown = self.countdown(queue)?;
        let t = countdown.position;
        let cues = current.cues();

        if policy == AdvancePolicy::Local {
            self.talk_up(&current, &cues, t, queue, log);
            if !self.auto_next_triggered && cues.start_next_reached(t) {
                self.auto_next_triggered = true;
                if !queue.is_empty() {
                    if current.is_overlay_eligible() {
                        self.start_next_with_overlay(queue, log, "auto");
                    } else {
                        self.fade_and_next(queue, log, "auto");
                    }
                }
            }
        }

        let still_current = queue.current_id() == Some(current.id);
        if still_current && self.loop_enabled {
            if let Some(target) = cues.loop_target(t, self.settings.loop_tolerance) {
                let deck = &mut self.decks[self.active];
                deck.seek(target);
                if let Err(e) = deck.play() {
                    log::warn!("Loop restart failed: {}", e);
                }
            }
        }

        if still_current && policy == AdvancePolicy::Local {
            self.maybe_prestart(&current, countdown.remaining, queue);
        }
        Some(countdown)
    }

    /// Complete the running fade right now.
    pub fn finish_fade(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger) {
        match self.fade.take() {
            CrossfadeState::Idle => {}
            CrossfadeState::Fading {
                outgoing,
                incoming: Some(incoming),
                next_item,
            } => {
                self.decks[outgoing].stop();
                let from_queue = next_item.and_then(|id| queue.dequeue(id));
                let next = self.decks[incoming].item.clone().or(from_queue);
                if let Some(prev) = queue.take_current() {
                    log.end(&prev, "fade");
                }
                self.active = incoming;
                self.prestarted = None;
                self.auto_next_triggered = false;
                if let Some(item) = next {
                    let rate = self.rate_for(&item);
                    self.decks[incoming].set_rate(rate);
                    log::info!("Crossfade complete; '{}' on {}", item.title, DeckId::main(incoming));
                    queue.set_current(item);
                }
            }
            CrossfadeState::Fading {
                outgoing,
                incoming: None,
                ..
            } => {
                self.decks[outgoing].stop();
                if let Some(cur) = queue.take_current() {
                    log.end(&cur, "fade_out");
                }
                self.prestarted = None;
                self.auto_next_triggered = false;
                log::info!("Fade to silence complete on {}", DeckId::main(outgoing));
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Make sure `slot` is playing `item` at full volume and the right rate.
    /// A deck that already holds the item (prestarted) is not reloaded.
    fn cue_up(&mut self, slot: usize, item: &QueueItem) -> Result<(), String> {
        let rate = self.rate_for(item);
        let deck = &mut self.decks[slot];
        if !(deck.holds(item) && deck.has_source()) {
            deck.load(item)?;
        }
        deck.set_volume(1.0);
        deck.set_rate(rate);
        deck.play()
    }

    fn launch(
        &mut self,
        slot: usize,
        item: QueueItem,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        reason: &str,
    ) -> bool {
        match self.cue_up(slot, &item) {
            Ok(()) => {
                log.start(&item, reason);
                log::info!("{} playing '{}' ({})", DeckId::main(slot), item.title, reason);
                let on_deck = self.decks[slot].item.clone().unwrap_or(item);
                queue.set_current(on_deck);
                self.status = None;
                true
            }
            Err(e) => {
                self.abandon(slot, &item, &e);
                false
            }
        }
    }

    fn abandon(&mut self, slot: usize, item: &QueueItem, err: &str) {
        log::warn!("Abandoning '{}': {}", item.title, err);
        self.status = Some(format!("Could not play '{}': {}", item.title, err));
        self.decks[slot].stop();
    }

    fn abandon_overlay(&mut self, item: &QueueItem, err: &str) {
        log::warn!("Abandoning overlay '{}': {}", item.title, err);
        self.status = Some(format!("Could not play '{}': {}", item.title, err));
        self.overlay.stop();
    }

    fn step_fade(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger) {
        let Some(outgoing) = self.fade.outgoing() else {
            return;
        };
        let deck = &mut self.decks[outgoing];
        let (volume, done) = self.settings.ramp.next(deck.volume());
        deck.set_volume(volume);
        if done {
            self.finish_fade(queue, log);
        }
    }

    fn poll_decks(&mut self, queue: &mut QueueManager, log: &mut PlaybackLogger, policy: AdvancePolicy) {
        for slot in 0..2 {
            for event in self.decks[slot].poll_events() {
                match event {
                    MediaEvent::Loaded { .. } => {
                        if let Some(item) = self.decks[slot].item.clone() {
                            let rate = self.rate_for(&item);
                            self.decks[slot].set_rate(rate);
                        }
                    }
                    MediaEvent::Ended => self.on_ended(slot, queue, log, policy),
                    MediaEvent::Error(e) => self.on_error(slot, &e, queue, log),
                    MediaEvent::Playing | MediaEvent::Paused => {}
                }
            }
        }
        for event in self.overlay.poll_events() {
            match event {
                MediaEvent::Ended => self.stop_overlay(log, "ended"),
                MediaEvent::Error(e) => {
                    log::warn!("Overlay deck error: {}", e);
                    self.status = Some(format!("Overlay error: {}", e));
                    self.stop_overlay(log, "error");
                }
                _ => {}
            }
        }
    }

    fn on_ended(
        &mut self,
        slot: usize,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
        policy: AdvancePolicy,
    ) {
        if self.fade.outgoing() == Some(slot) {
            self.finish_fade(queue, log);
            return;
        }
        if slot != self.active {
            if self.prestarted == Some(slot) {
                self.prestarted = None;
            }
            self.decks[slot].stop();
            return;
        }

        if let Some(cur) = queue.current() {
            log.end(cur, "ended");
        }
        if policy == AdvancePolicy::Held {
            queue.take_current();
            self.decks[slot].stop();
            self.auto_next_triggered = false;
            return;
        }

        if queue.head().is_some_and(QueueItem::is_stop) {
            let consumed = queue.shift_past_stops();
            log::info!("Consumed {} stop marker(s); automatic advance halted", consumed);
            self.stop_all(queue, log);
            return;
        }

        if let Some(pre) = self.prestarted {
            let ready = queue.head().is_some_and(|h| self.decks[pre].holds(h));
            if ready {
                self.decks[slot].stop();
                queue.take_current();
                if let Some(next) = queue.take_head() {
                    self.active = pre;
                    self.prestarted = None;
                    self.auto_next_triggered = false;
                    let rate = self.rate_for(&next);
                    self.decks[pre].set_rate(rate);
                    log.start(&next, "auto");
                    log::info!("Promoted prestarted {} with '{}'", DeckId::main(pre), next.title);
                    let on_deck = self.decks[pre].item.clone().unwrap_or(next);
                    queue.set_current(on_deck);
                }
                return;
            }
        }

        if queue.is_empty() {
            self.stop_all(queue, log);
        } else {
            self.start_from(queue, log, 0, Some(slot), "auto");
        }
    }

    fn on_error(&mut self, slot: usize, err: &str, queue: &mut QueueManager, log: &mut PlaybackLogger) {
        if slot == self.active && self.fade.outgoing() != Some(slot) {
            if let Some(cur) = queue.take_current() {
                log.end(&cur, "error");
                self.status = Some(format!("Playback error on '{}': {}", cur.title, err));
            }
            log::warn!("{} error: {}", DeckId::main(slot), err);
            self.decks[slot].stop();
            self.auto_next_triggered = false;
            return;
        }

        log::warn!("{} error: {}", DeckId::main(slot), err);
        if self.fade.incoming() == Some(slot) {
            // The incoming item failed mid-crossfade: keep the outgoing one.
            if let CrossfadeState::Fading {
                outgoing,
                next_item,
                ..
            } = self.fade.take()
            {
                let deck = &mut self.decks[outgoing];
                deck.set_volume(1.0);
                if deck.state == DeckState::FadingOut {
                    deck.state = DeckState::Playing;
                }
                if let Some(id) = next_item {
                    queue.dequeue(id);
                }
                self.auto_next_triggered = false;
            }
        } else if self.fade.outgoing() == Some(slot) {
            self.finish_fade(queue, log);
        }
        if self.prestarted == Some(slot) {
            self.prestarted = None;
            if let Some(id) = self.decks[slot].item.as_ref().map(|i| i.id) {
                queue.dequeue(id);
            }
        }
        self.status = Some(format!("Playback error on {}: {}", DeckId::main(slot), err));
        self.decks[slot].stop();
    }

    /// Manual-mode talk-up: once a music item passes its outro, play the
    /// first queued overlay on the overlay deck and stop it when the next
    /// track reaches its intro.
    fn talk_up(
        &mut self,
        current: &QueueItem,
        cues: &CuePoints,
        t: f64,
        queue: &mut QueueManager,
        log: &mut PlaybackLogger,
    ) {
        if current.kind == ItemKind::Music && !self.overlay.has_source() {
            if let Some(outro) = cues.outro() {
                if t >= outro {
                    if let Some(candidate) = queue.first_overlay_eligible().map(|c| c.id) {
                        let stop_at = queue.first_primary().and_then(|next| {
                            next.cues().intro().map(|at| OverlayStop {
                                at,
                                for_item: next.id,
                            })
                        });
                        if self.play_overlay_item(queue, log, candidate) {
                            self.overlay_stop = stop_at;
                        }
                    }
                }
            }
        }
        if let Some(stop) = self.overlay_stop {
            if current.id == stop.for_item && t >= stop.at {
                self.stop_overlay(log, "intro");
            }
        }
    }

    /// Start the next item early behind a voice track so the swap at the
    /// voice track's end is gapless.
    fn maybe_prestart(&mut self, current: &QueueItem, remaining: f64, queue: &mut QueueManager) {
        if self.prestarted.is_some() || self.fade.is_fading() || current.kind != ItemKind::VoiceTrack {
            return;
        }
        let Some(next) = queue.head().filter(|h| !h.is_stop()).cloned() else {
            return;
        };
        let next_cues = next.cues();
        let Some(target) = next_cues.intro().or(next_cues.outro()) else {
            return;
        };
        if remaining > target + self.settings.prestart_margin {
            return;
        }
        let idle = 1 - self.active;
        match self.cue_up(idle, &next) {
            Ok(()) => {
                self.prestarted = Some(idle);
                log::info!("Prestarted '{}' on {}", next.title, DeckId::main(idle));
            }
            Err(e) => {
                self.abandon(idle, &next, &e);
                queue.dequeue(next.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{MemoryEventSink, PlaybackEvent};
    use crate::clock::ManualClock;
    use crate::queue::ItemDraft;

    struct Rig {
        clock: ManualClock,
        catalog: SimCatalog,
        sink: MemoryEventSink,
        queue: QueueManager,
        log: PlaybackLogger,
        player: DualDeckPlayer,
    }

    impl Rig {
        fn new() -> Self {
            let clock = ManualClock::new();
            let catalog = SimCatalog::new();
            let sink = MemoryEventSink::new();
            let player = DualDeckPlayer::simulated(
                Arc::new(clock.clone()),
                catalog.clone(),
                PlayerSettings::default(),
            );
            Self {
                clock,
                catalog,
                log: PlaybackLogger::new(Box::new(sink.clone())),
                sink,
                queue: QueueManager::new(),
                player,
            }
        }

        fn add(&mut self, title: &str, kind: ItemKind, duration: f64, cues: CuePoints) -> QueueItem {
            let url = format!("{title}.mp3");
            self.catalog.insert(&url, duration);
            self.queue.enqueue(
                ItemDraft::new(title, kind)
                    .with_url(url)
                    .with_duration(duration)
                    .with_cues(cues),
                None,
            )
        }

        fn add_stop(&mut self) -> QueueItem {
            self.queue.enqueue(ItemDraft::stop_marker(), None)
        }

        fn start(&mut self) {
            self.player.start_from(&mut self.queue, &mut self.log, 0, None, "manual");
        }

        fn tick(&mut self, policy: AdvancePolicy) -> Option<CueCountdown> {
            self.player.tick(&mut self.queue, &mut self.log, policy)
        }

        fn current(&self) -> Option<ItemId> {
            self.queue.current_id()
        }

        fn starts_of(&self, id: ItemId) -> usize {
            self.sink
                .events()
                .iter()
                .filter(|(e, i)| *e == PlaybackEvent::Start && *i == id)
                .count()
        }
    }

    fn no_cues() -> CuePoints {
        CuePoints::default()
    }

    #[test]
    fn start_from_plays_item_and_drops_earlier_ones() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 60.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 60.0, no_cues());
        let c = rig.add("c", ItemKind::Music, 60.0, no_cues());
        rig.player.start_from(&mut rig.queue, &mut rig.log, 1, None, "manual");

        assert_eq!(rig.current(), Some(b.id));
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.queue.head().map(|i| i.id), Some(c.id));
        assert!(rig.player.active_deck().is_playing());
        assert!(!rig.player.deck(DeckId::DeckB).has_source());
        assert_eq!(rig.starts_of(b.id), 1);
    }

    #[test]
    fn operator_selected_stop_truncates_and_halts() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 60.0, no_cues());
        rig.add("b", ItemKind::Music, 60.0, no_cues());
        let stop = rig.add_stop();
        let c = rig.add("c", ItemKind::Music, 60.0, no_cues());
        rig.start();
        assert_eq!(rig.current(), Some(a.id));

        let idx = rig.queue.position_of(stop.id).unwrap();
        rig.player.start_from(&mut rig.queue, &mut rig.log, idx, None, "manual");
        assert!(rig.current().is_none());
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.queue.head().map(|i| i.id), Some(c.id));
        assert!(!rig.player.deck(DeckId::DeckA).has_source());
        assert!(rig.sink.events().iter().all(|(_, id)| *id != stop.id));
    }

    #[test]
    fn fade_and_next_releases_old_deck_at_floor() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 200.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 200.0, no_cues());
        rig.start();
        rig.player.fade_and_next(&mut rig.queue, &mut rig.log, "manual");

        assert!(rig.player.is_fading());
        assert_eq!(rig.current(), Some(a.id), "old item stays current during the fade");
        assert!(rig.player.deck(DeckId::DeckB).is_playing());
        assert_eq!(rig.player.deck(DeckId::DeckB).volume(), 1.0);

        let mut ticks = 0;
        while rig.player.is_fading() && ticks < 100 {
            rig.clock.advance(0.08);
            rig.tick(AdvancePolicy::Local);
            ticks += 1;
        }
        assert_eq!(ticks, 17);
        let old = rig.player.deck(DeckId::DeckA);
        assert_eq!(old.state, DeckState::Idle);
        assert!(!old.has_source());
        assert_eq!(old.volume(), 1.0);
        assert_eq!(rig.player.active_id(), DeckId::DeckB);
        assert_eq!(rig.current(), Some(b.id));
        assert!(rig.queue.is_empty());
    }

    #[test]
    fn auto_advance_fires_once_at_start_next() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            intro: Some(5.0),
            start_next: Some(180.0),
            outro: Some(170.0),
            ..Default::default()
        };
        rig.add("a", ItemKind::Music, 200.0, cues);
        let b = rig.add("b", ItemKind::Music, 200.0, no_cues());
        rig.start();

        rig.clock.set(179.9);
        let cd = rig.tick(AdvancePolicy::Local).unwrap();
        assert!((cd.remaining - 0.1).abs() < 1e-6);
        assert!(!rig.player.is_fading());
        assert_eq!(rig.starts_of(b.id), 0);

        rig.clock.set(180.0);
        rig.tick(AdvancePolicy::Local);
        assert!(rig.player.is_fading());
        assert!(rig.player.auto_next_triggered());
        for _ in 0..5 {
            rig.clock.advance(0.08);
            rig.tick(AdvancePolicy::Local);
        }
        assert_eq!(rig.starts_of(b.id), 1);
        assert!(rig.player.deck(DeckId::DeckA).is_playing(), "still fading");
    }

    #[test]
    fn planned_policy_suppresses_local_advance() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            start_next: Some(10.0),
            ..Default::default()
        };
        rig.add("a", ItemKind::Music, 60.0, cues);
        rig.add("b", ItemKind::Music, 60.0, no_cues());
        rig.start();
        rig.clock.set(12.0);
        rig.tick(AdvancePolicy::Planned);
        assert!(!rig.player.is_fading());
        assert!(!rig.player.auto_next_triggered());
    }

    #[test]
    fn natural_end_reaching_stop_halts_without_events_for_stop() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 30.0, no_cues());
        let stop = rig.add_stop();
        let b = rig.add("b", ItemKind::Music, 30.0, no_cues());
        rig.start();
        rig.clock.set(30.0);
        rig.tick(AdvancePolicy::Local);

        assert!(rig.current().is_none());
        assert_eq!(rig.queue.head().map(|i| i.id), Some(b.id));
        assert_eq!(
            rig.sink.events(),
            vec![(PlaybackEvent::Start, a.id), (PlaybackEvent::End, a.id)]
        );
        assert!(rig.queue.position_of(stop.id).is_none());
    }

    #[test]
    fn auto_advance_into_stop_halts() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            start_next: Some(20.0),
            ..Default::default()
        };
        rig.add("a", ItemKind::Music, 30.0, cues);
        rig.add_stop();
        let b = rig.add("b", ItemKind::Music, 30.0, no_cues());
        rig.start();
        rig.clock.set(20.0);
        rig.tick(AdvancePolicy::Local);

        assert!(rig.current().is_none());
        assert!(!rig.player.is_fading());
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.queue.head().map(|i| i.id), Some(b.id));
        assert_eq!(rig.starts_of(b.id), 0);
    }

    #[test]
    fn natural_end_starts_next_item() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 30.0, no_cues());
        let b = rig.add("b", ItemKind::Psa, 30.0, no_cues());
        rig.start();
        rig.clock.set(30.0);
        rig.tick(AdvancePolicy::Planned);
        assert_eq!(rig.current(), Some(b.id));
        assert!(rig.player.active_deck().is_playing());
    }

    #[test]
    fn held_policy_clears_current_on_end_without_advancing() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 30.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 30.0, no_cues());
        rig.start();
        rig.clock.set(31.0);
        rig.tick(AdvancePolicy::Held);
        assert!(rig.current().is_none());
        assert_eq!(rig.queue.head().map(|i| i.id), Some(b.id));
        assert_eq!(rig.starts_of(b.id), 0);
    }

    #[test]
    fn voice_track_hands_over_to_overlay_deck() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            start_next: Some(8.0),
            ..Default::default()
        };
        let vt = rig.add("vt", ItemKind::VoiceTrack, 12.0, cues);
        let m = rig.add("m", ItemKind::Music, 200.0, no_cues());
        rig.start();
        rig.clock.set(8.0);
        rig.tick(AdvancePolicy::Local);

        let overlay = rig.player.deck(DeckId::Overlay);
        assert_eq!(overlay.source().as_deref(), Some("vt.mp3"));
        assert!((overlay.position() - 8.0).abs() < 1e-6);
        assert_eq!(overlay.item.as_ref().map(|i| i.id), Some(vt.id));
        assert_eq!(rig.current(), Some(m.id));
        assert_eq!(rig.player.active_id(), DeckId::DeckB);
        assert!(!rig.player.deck(DeckId::DeckA).has_source());

        rig.clock.set(12.0);
        rig.tick(AdvancePolicy::Local);
        assert!(!rig.player.deck(DeckId::Overlay).has_source(), "overlay unloads at its end");
        assert_eq!(rig.current(), Some(m.id));
    }

    #[test]
    fn voice_track_prestarts_next_and_promotes_it() {
        let mut rig = Rig::new();
        rig.add("vt", ItemKind::VoiceTrack, 30.0, no_cues());
        let intro = CuePoints {
            intro: Some(10.0),
            ..Default::default()
        };
        let m = rig.add("m", ItemKind::Music, 200.0, intro);
        rig.start();

        rig.clock.set(19.5);
        rig.tick(AdvancePolicy::Local);
        assert!(rig.player.prestarted().is_none());

        rig.clock.set(19.8);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(rig.player.prestarted(), Some(DeckId::DeckB));
        assert!(rig.player.deck(DeckId::DeckB).is_playing());

        rig.clock.set(30.0);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(rig.current(), Some(m.id));
        assert_eq!(rig.player.active_id(), DeckId::DeckB);
        assert!((rig.player.position() - 10.2).abs() < 1e-6, "not reloaded");
        assert_eq!(rig.starts_of(m.id), 1);
    }

    #[test]
    fn talk_up_plays_overlay_after_outro_and_stops_at_next_intro() {
        let mut rig = Rig::new();
        let a_cues = CuePoints {
            outro: Some(50.0),
            ..Default::default()
        };
        rig.add("a", ItemKind::Music, 60.0, a_cues);
        let vt = rig.add("vt", ItemKind::VoiceTrack, 20.0, no_cues());
        let b_cues = CuePoints {
            intro: Some(8.0),
            ..Default::default()
        };
        let b = rig.add("b", ItemKind::Music, 200.0, b_cues);
        rig.start();

        rig.clock.set(50.0);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(
            rig.player.deck(DeckId::Overlay).item.as_ref().map(|i| i.id),
            Some(vt.id)
        );
        assert!(rig.queue.position_of(vt.id).is_none());
        assert_eq!(
            rig.player.overlay_stop(),
            Some(OverlayStop { at: 8.0, for_item: b.id })
        );

        rig.clock.set(60.0);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(rig.current(), Some(b.id));
        assert!(rig.player.deck(DeckId::Overlay).has_source());

        rig.clock.set(68.0);
        rig.tick(AdvancePolicy::Local);
        assert!(!rig.player.deck(DeckId::Overlay).has_source());
    }

    #[test]
    fn load_failure_abandons_item_without_advancing() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 30.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 30.0, no_cues());
        rig.catalog.fail("a.mp3");
        rig.start();
        assert!(rig.current().is_none());
        assert!(rig.player.status().is_some_and(|s| s.contains("'a'")));
        assert_eq!(rig.queue.head().map(|i| i.id), Some(b.id));
        assert_eq!(rig.starts_of(a.id), 0);
        rig.tick(AdvancePolicy::Local);
        assert!(rig.current().is_none());
    }

    #[test]
    fn fade_out_current_clears_current() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 200.0, no_cues());
        rig.start();
        rig.player.fade_out_current(&mut rig.queue, &mut rig.log);
        for _ in 0..20 {
            rig.tick(AdvancePolicy::Planned);
        }
        assert!(rig.current().is_none());
        assert!(!rig.player.active_deck().has_source());
        assert_eq!(rig.player.active_deck().volume(), 1.0);
    }

    #[test]
    fn loop_seeks_back_to_loop_in() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            loop_in: Some(10.0),
            loop_out: Some(20.0),
            ..Default::default()
        };
        rig.add("a", ItemKind::Music, 60.0, cues);
        rig.start();
        assert!(rig.player.set_loop(&rig.queue, true));
        rig.clock.set(19.96);
        rig.tick(AdvancePolicy::Local);
        assert!((rig.player.position() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn loop_cannot_be_enabled_without_loop_cues() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 60.0, no_cues());
        rig.start();
        assert!(!rig.player.set_loop(&rig.queue, true));
        assert!(!rig.player.loop_enabled());
    }

    #[test]
    fn top40_boosts_music_only() {
        let music = ItemDraft::new("m", ItemKind::Music).into_item(ItemId(1));
        let psa = ItemDraft::new("p", ItemKind::Psa).into_item(ItemId(2));
        let boost = semitone_rate(TOP40_SEMITONES);
        assert!((compute_rate(&music, true, boost) - 2f64.powf(0.5 / 12.0)).abs() < 1e-12);
        assert_eq!(compute_rate(&psa, true, boost), 1.0);
        assert_eq!(compute_rate(&music, false, boost), 1.0);
    }

    #[test]
    fn toggling_top40_reapplies_rate_to_loaded_decks() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 60.0, no_cues());
        rig.start();
        assert_eq!(rig.player.active_deck().rate(), 1.0);
        rig.player.set_top40(true);
        assert!((rig.player.active_deck().rate() - semitone_rate(0.5)).abs() < 1e-12);
        assert!(!rig.player.active_deck().preserves_pitch());
        rig.player.set_top40(false);
        assert_eq!(rig.player.active_deck().rate(), 1.0);
    }

    #[test]
    fn toggle_pause_freezes_position() {
        let mut rig = Rig::new();
        rig.add("a", ItemKind::Music, 60.0, no_cues());
        rig.start();
        rig.clock.set(5.0);
        rig.player.toggle_pause(&rig.queue);
        rig.clock.set(9.0);
        assert!((rig.player.position() - 5.0).abs() < 1e-6);
        rig.player.toggle_pause(&rig.queue);
        rig.clock.set(10.0);
        assert!((rig.player.position() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn play_next_with_empty_queue_stops_everything() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 60.0, no_cues());
        rig.start();
        rig.player.play_next(&mut rig.queue, &mut rig.log, "skip");
        assert!(rig.current().is_none());
        assert!(!rig.player.active_deck().has_source());
        assert_eq!(rig.sink.entries().last().map(|e| e.reason.clone()), Some("skip".to_string()));
        assert_eq!(rig.sink.events().last(), Some(&(PlaybackEvent::End, a.id)));
    }

    #[test]
    fn manual_overlay_url_plays_on_overlay_deck() {
        let mut rig = Rig::new();
        assert!(rig.player.play_overlay_url(&mut rig.log, "  ").is_err());
        rig.player.play_overlay_url(&mut rig.log, "sweeper.mp3").unwrap();
        assert!(rig.player.deck(DeckId::Overlay).is_playing());
    }

    #[test]
    fn voice_track_cue_during_operator_fade_does_not_pass_a_stop() {
        let mut rig = Rig::new();
        let cues = CuePoints {
            start_next: Some(8.0),
            ..Default::default()
        };
        rig.add("vt", ItemKind::VoiceTrack, 12.0, cues);
        let b = rig.add("b", ItemKind::Music, 200.0, no_cues());
        let stop = rig.add_stop();
        let c = rig.add("c", ItemKind::Music, 200.0, no_cues());
        rig.start();

        rig.clock.set(7.9);
        rig.player.fade_and_next(&mut rig.queue, &mut rig.log, "manual");
        rig.clock.set(8.0);
        rig.tick(AdvancePolicy::Local);

        assert_eq!(rig.current(), Some(b.id));
        assert_eq!(rig.player.active_id(), DeckId::DeckB);
        assert!(rig.player.active_deck().holds(&b));
        assert!(!rig.player.deck(DeckId::Overlay).has_source());
        assert_eq!(rig.queue.head().map(|i| i.id), Some(stop.id));
        assert_eq!(rig.queue.position_of(c.id), Some(1));
        assert_eq!(rig.starts_of(c.id), 0);
    }

    #[test]
    fn playback_error_on_active_deck_abandons_without_advancing() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 60.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 60.0, no_cues());
        rig.start();
        rig.catalog.fail_during_play("a.mp3");
        rig.clock.set(5.0);
        rig.tick(AdvancePolicy::Local);

        assert!(rig.current().is_none());
        assert!(rig.player.status().is_some_and(|s| s.contains("'a'")));
        assert!(!rig.player.deck(DeckId::DeckA).has_source());
        assert_eq!(rig.queue.head().map(|i| i.id), Some(b.id));
        assert_eq!(rig.starts_of(b.id), 0);
        assert!(rig
            .sink
            .events()
            .contains(&(PlaybackEvent::End, a.id)));
    }

    #[test]
    fn incoming_error_mid_crossfade_restores_outgoing_deck() {
        let mut rig = Rig::new();
        let a = rig.add("a", ItemKind::Music, 200.0, no_cues());
        let b = rig.add("b", ItemKind::Music, 200.0, no_cues());
        let c = rig.add("c", ItemKind::Music, 200.0, no_cues());
        rig.start();
        rig.player.fade_and_next(&mut rig.queue, &mut rig.log, "manual");
        for _ in 0..3 {
            rig.clock.advance(0.08);
            rig.tick(AdvancePolicy::Local);
        }
        assert!(rig.player.deck(DeckId::DeckA).volume() < 1.0);

        rig.catalog.fail_during_play("b.mp3");
        rig.clock.advance(0.08);
        rig.tick(AdvancePolicy::Local);

        assert!(!rig.player.is_fading());
        assert_eq!(rig.current(), Some(a.id));
        assert_eq!(rig.player.active_id(), DeckId::DeckA);
        let outgoing = rig.player.deck(DeckId::DeckA);
        assert_eq!(outgoing.volume(), 1.0);
        assert_eq!(outgoing.state, DeckState::Playing);
        assert!(!rig.player.deck(DeckId::DeckB).has_source());
        assert!(rig.queue.position_of(b.id).is_none());
        assert_eq!(rig.queue.head().map(|i| i.id), Some(c.id));
        assert!(rig.player.status().is_some());
    }

    #[test]
    fn prestarted_deck_error_drops_the_prestarted_item() {
        let mut rig = Rig::new();
        let vt = rig.add("vt", ItemKind::VoiceTrack, 30.0, no_cues());
        let intro = CuePoints {
            intro: Some(10.0),
            ..Default::default()
        };
        let m = rig.add("m", ItemKind::Music, 200.0, intro);
        let c = rig.add("c", ItemKind::Music, 200.0, no_cues());
        rig.start();
        rig.clock.set(19.8);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(rig.player.prestarted(), Some(DeckId::DeckB));

        rig.catalog.fail_during_play("m.mp3");
        rig.clock.set(20.0);
        rig.tick(AdvancePolicy::Local);
        assert!(rig.player.prestarted().is_none());
        assert!(rig.queue.position_of(m.id).is_none());
        assert_eq!(rig.current(), Some(vt.id));
        assert!(rig.player.status().is_some());

        rig.clock.set(30.0);
        rig.tick(AdvancePolicy::Local);
        assert_eq!(rig.current(), Some(c.id));
        assert_eq!(rig.starts_of(m.id), 0);
    }
}
