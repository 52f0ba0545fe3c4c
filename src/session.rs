//! One show: queue, decks, automation and control authority together.
//!
//! Several sessions can run side by side; nothing here is global.

use std::collections::HashSet;
use std::sync::Arc;

use crate::analytics::{EventSink, PlaybackLogger};
use crate::audio::{DeckId, DualDeckPlayer, SimCatalog};
use crate::clock::Clock;
use crate::config::AutomatorConfig;
use crate::control::{Arbiter, Authority, TransportCommand};
use crate::cue::CueCountdown;
use crate::gateway::NowPlaying;
use crate::queue::{ItemDraft, ItemId, QueueItem, QueueManager, QueueSnapshot, QueueStore};
use crate::scheduler::{
    AutomationContext, AutomationPlan, AutomationScheduler, ControlMode, Planner, PlanRequest,
    TimerAction,
};

pub struct PlayerSession {
    config: AutomatorConfig,
    clock: Arc<dyn Clock>,
    queue: QueueManager,
    store: Box<dyn QueueStore>,
    player: DualDeckPlayer,
    log: PlaybackLogger,
    scheduler: AutomationScheduler,
    arbiter: Arbiter,
    planner: Arc<dyn Planner>,
    now_playing: Option<NowPlaying>,
    countdown: Option<CueCountdown>,
}

impl PlayerSession {
    pub fn new(
        config: AutomatorConfig,
        clock: Arc<dyn Clock>,
        player: DualDeckPlayer,
        store: Box<dyn QueueStore>,
        sink: Box<dyn EventSink>,
        planner: Arc<dyn Planner>,
    ) -> Self {
        let scheduler = AutomationScheduler::new(config.initial_mode());
        let arbiter = Arbiter::new(config.authority.initial_authority(&config.external_source));
        let mut player = player;
        player.set_top40(config.top40);
        Self {
            config,
            clock,
            queue: QueueManager::new(),
            store,
            player,
            log: PlaybackLogger::new(sink),
            scheduler,
            arbiter,
            planner,
            now_playing: None,
            countdown: None,
        }
    }

    /// Session on simulated decks, with the planner and event sink the
    /// config asks for.
    pub fn simulated(
        config: AutomatorConfig,
        clock: Arc<dyn Clock>,
        catalog: SimCatalog,
        store: Box<dyn QueueStore>,
    ) -> Result<Self, String> {
        let planner = config.build_planner()?;
        let sink = config.build_event_sink()?;
        let player = DualDeckPlayer::simulated(clock.clone(), catalog, config.player_settings());
        Ok(Self::new(config, clock, player, store, sink, planner))
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn config(&self) -> &AutomatorConfig {
        &self.config
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn player(&self) -> &DualDeckPlayer {
        &self.player
    }

    pub fn scheduler(&self) -> &AutomationScheduler {
        &self.scheduler
    }

    pub fn mode(&self) -> ControlMode {
        self.scheduler.mode()
    }

    pub fn authority(&self) -> &Authority {
        self.arbiter.authority()
    }

    pub fn planner(&self) -> Arc<dyn Planner> {
        self.planner.clone()
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    /// Countdown from the last tick.
    pub fn countdown(&self) -> Option<CueCountdown> {
        self.countdown
    }

    pub fn status(&self) -> Option<&str> {
        self.player.status()
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.queue.current()
    }

    // ── Queue ─────────────────────────────────────────────────────────────

    /// Insert an item. The first item into an idle session starts playing
    /// unless another system holds authority.
    pub fn enqueue(&mut self, draft: ItemDraft, position: Option<usize>) -> QueueItem {
        let was_idle = self.queue.is_idle();
        let item = self.queue.enqueue(draft, position);
        self.log.insert(&item, "manual");
        let at = self.queue.position_of(item.id).unwrap_or(0);
        mirror("enqueue", self.store.enqueue(&item, at));

        if was_idle && !item.is_stop() && self.arbiter.authority().is_local() {
            self.synced(|s| s.player.start_from(&mut s.queue, &mut s.log, 0, None, "auto"));
        }
        item
    }

    pub fn add_stop(&mut self, position: Option<usize>) -> QueueItem {
        self.enqueue(ItemDraft::stop_marker(), position)
    }

    pub fn dequeue(&mut self, id: ItemId) -> bool {
        if self.queue.dequeue(id).is_none() {
            return false;
        }
        self.log.forget(id);
        mirror("dequeue", self.store.dequeue(id));
        true
    }

    pub fn move_item(&mut self, id: ItemId, position: usize) -> bool {
        let before = self.order();
        if !self.queue.move_item(id, position) {
            return false;
        }
        self.mirror_order(&before);
        true
    }

    /// Operator drag. Drops outside the item's segment are refused; the
    /// item's trailing overlays move with it.
    pub fn drag(&mut self, id: ItemId, drop_index: usize) -> bool {
        let before = self.order();
        if !self.queue.drag(id, drop_index) {
            return false;
        }
        self.mirror_order(&before);
        true
    }

    /// Start the item at `index`, dropping everything ahead of it. A stop
    /// marker there truncates the queue and halts playback.
    pub fn select(&mut self, index: usize) -> bool {
        if !self.permits(TransportCommand::Select) || index >= self.queue.len() {
            return false;
        }
        self.planner.resume();
        self.synced(|s| s.player.start_from(&mut s.queue, &mut s.log, index, None, "manual"));
        true
    }

    /// Remove every item and silence every deck. Under external control
    /// only the queued items go; what is on air keeps playing.
    pub fn clear(&mut self) {
        let dropped = if self.arbiter.is_overridden() {
            self.queue.clear_queued()
        } else {
            self.player.stop_all(&mut self.queue, &mut self.log);
            self.queue.clear()
        };
        for item in dropped {
            self.log.forget(item.id);
            mirror("dequeue", self.store.dequeue(item.id));
        }
        self.scheduler.cancel();
        log::info!("Queue cleared");
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    /// Replace the queue with a snapshot. Nothing is on air afterwards,
    /// unless another system holds authority: then the decks and the
    /// current item are left alone and only the queued items change.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        self.scheduler.cancel();
        if !self.arbiter.is_overridden() {
            self.player.stop_all(&mut self.queue, &mut self.log);
            self.queue.restore(snapshot);
            return;
        }
        let on_air = self.queue.take_current();
        self.queue.restore(snapshot);
        if let Some(cur) = on_air {
            self.queue.dequeue(cur.id);
            self.queue.set_current(cur);
        }
    }

    /// Restore from the persistence collaborator, if it has a snapshot.
    pub fn restore_from_store(&mut self) -> Result<bool, String> {
        match self.store.fetch_snapshot()? {
            Some(snapshot) => {
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Transport ─────────────────────────────────────────────────────────

    /// Resume a paused item, or start the head when nothing is on air.
    pub fn play(&mut self) -> bool {
        if !self.permits(TransportCommand::Play) {
            return false;
        }
        if self.queue.current().is_some() {
            if self.player.active_deck().is_paused() {
                self.player.toggle_pause(&self.queue);
            }
        } else if !self.queue.is_empty() {
            self.planner.resume();
            self.synced(|s| s.player.start_from(&mut s.queue, &mut s.log, 0, None, "manual"));
        }
        true
    }

    pub fn play_next(&mut self) -> bool {
        if !self.permits(TransportCommand::Skip) {
            return false;
        }
        self.planner.resume();
        self.synced(|s| s.player.play_next(&mut s.queue, &mut s.log, "skip"));
        true
    }

    pub fn toggle_pause(&mut self) -> bool {
        if !self.permits(TransportCommand::Pause) {
            return false;
        }
        self.player.toggle_pause(&self.queue);
        true
    }

    pub fn fade_and_next(&mut self) -> bool {
        if !self.permits(TransportCommand::Fade) {
            return false;
        }
        self.synced(|s| s.player.fade_and_next(&mut s.queue, &mut s.log, "manual"));
        true
    }

    pub fn fade_out(&mut self) -> bool {
        if !self.permits(TransportCommand::Fade) {
            return false;
        }
        self.player.fade_out_current(&mut self.queue, &mut self.log);
        true
    }

    pub fn stop_all(&mut self) -> bool {
        if !self.permits(TransportCommand::Stop) {
            return false;
        }
        self.player.stop_all(&mut self.queue, &mut self.log);
        self.scheduler.cancel();
        true
    }

    pub fn play_overlay_url(&mut self, url: &str) -> Result<(), String> {
        if !self.permits(TransportCommand::Overlay) {
            return Err("Overlay playback is locked while under external control".to_string());
        }
        self.player.play_overlay_url(&mut self.log, url)
    }

    pub fn set_top40(&mut self, enabled: bool) {
        self.player.set_top40(enabled);
    }

    /// Returns `false` when looping was asked for but the current item has
    /// no loop cues.
    pub fn set_loop(&mut self, enabled: bool) -> bool {
        self.player.set_loop(&self.queue, enabled)
    }

    // ── Modes ─────────────────────────────────────────────────────────────

    pub fn set_mode(&mut self, mode: ControlMode) -> bool {
        if !self.scheduler.set_mode(mode) {
            return false;
        }
        if mode == ControlMode::Automation {
            self.planner.resume();
        }
        true
    }

    /// Hand authority to (or take it back from) an external system.
    /// Taking it away cancels pending timers and settles any fade.
    pub fn set_authority(&mut self, authority: Authority) -> bool {
        if !self.arbiter.set_authority(authority) {
            return false;
        }
        self.scheduler.cancel();
        if self.arbiter.is_overridden() {
            self.synced(|s| s.player.finish_fade(&mut s.queue, &mut s.log));
        }
        true
    }

    pub fn set_now_playing(&mut self, now_playing: Option<NowPlaying>) {
        if let Some(np) = now_playing {
            self.now_playing = Some(np);
        }
    }

    // ── Ticks ─────────────────────────────────────────────────────────────

    /// Playback tick: step decks and fades, run what the current mode and
    /// authority allow, then fire any automation timers that are due.
    pub fn tick(&mut self) -> Option<CueCountdown> {
        let policy = self.arbiter.advance_policy(self.scheduler.mode());
        self.countdown = self.synced(|s| s.player.tick(&mut s.queue, &mut s.log, policy));

        if self.arbiter.is_overridden() {
            self.scheduler.cancel();
        } else {
            let now = self.clock.now();
            for action in self.scheduler.due(now, self.queue.current_id()) {
                self.fire(action);
            }
        }
        self.scheduler.note_current(self.queue.current_id());
        self.countdown
    }

    fn fire(&mut self, action: TimerAction) {
        match action {
            TimerAction::PlayOverlay(id) => {
                let played = self.synced(|s| s.player.play_overlay_item(&mut s.queue, &mut s.log, id));
                if !played {
                    log::debug!("[automation] Overlay {} no longer playable", id);
                }
            }
            TimerAction::Fade(action) => {
                log::info!("[automation] {} timer fired", action.as_str());
                if self.queue.is_empty() {
                    self.player.fade_out_current(&mut self.queue, &mut self.log);
                } else {
                    self.synced(|s| s.player.fade_and_next(&mut s.queue, &mut s.log, "automation"));
                }
            }
        }
    }

    /// What to ask the planner on this automation tick, if anything.
    pub fn automation_request(&self) -> Option<(AutomationContext, PlanRequest)> {
        if !self.scheduler.is_automation() || self.arbiter.is_overridden() {
            return None;
        }
        let context = AutomationContext::from_queue(&self.queue)?;
        let deck = self.player.active_deck();
        let request = context.request(deck.position(), deck.duration());
        Some((context, request))
    }

    /// Adopt a planner answer. Failures and answers for an item that is no
    /// longer current are dropped and the old timers stay armed.
    pub fn apply_plan(
        &mut self,
        context: &AutomationContext,
        result: Result<AutomationPlan, String>,
    ) -> bool {
        let plan = match result {
            Ok(plan) => plan,
            Err(e) => {
                log::debug!("[automation] Planner unavailable: {}", e);
                return false;
            }
        };
        if !self.scheduler.is_automation() || self.arbiter.is_overridden() {
            return false;
        }
        if self.queue.current_id() != Some(context.current.id) {
            log::debug!("[automation] Discarded plan for '{}'", context.current.title);
            return false;
        }
        self.scheduler.apply_plan(plan, context, self.clock.now())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn permits(&self, command: TransportCommand) -> bool {
        self.arbiter.permits(command)
    }

    /// Run `f`, then tell the store about every item it consumed.
    /// Items dropped without going on air are released from the logger.
    fn synced<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let before = self.order();
        let out = f(self);
        let after: HashSet<ItemId> = self.queue.items().iter().map(|i| i.id).collect();
        let on_overlay = self.player.deck(DeckId::Overlay).item.as_ref().map(|i| i.id);
        for id in before.into_iter().filter(|id| !after.contains(id)) {
            if self.queue.current_id() != Some(id) && on_overlay != Some(id) {
                self.log.forget(id);
            }
            mirror("dequeue", self.store.dequeue(id));
        }
        out
    }

    fn order(&self) -> Vec<ItemId> {
        self.queue.items().iter().map(|i| i.id).collect()
    }

    /// Send the final position of every item in the span that changed,
    /// front to back, so replaying the moves reproduces the local order.
    fn mirror_order(&mut self, before: &[ItemId]) {
        let after = self.order();
        let changed = |at: &usize| before.get(*at) != after.get(*at);
        let (Some(first), Some(last)) = (
            (0..after.len()).find(changed),
            (0..after.len()).rev().find(changed),
        ) else {
            return;
        };
        for (at, id) in after.iter().enumerate().take(last + 1).skip(first) {
            mirror("move", self.store.move_item(*id, at));
        }
    }
}

/// Store failures never undo the local change.
fn mirror(op: &str, result: Result<(), String>) {
    if let Err(e) = result {
        log::warn!("[queue] Store {} failed: {}", op, e);
    }
}
