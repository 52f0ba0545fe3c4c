//! Headless driver: ticks a session on simulated decks, runs the planner
//! off the tick loop and polls RadioDJ.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::audio::sim::DEFAULT_SIM_DURATION;
use crate::audio::SimCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::AutomatorConfig;
use crate::gateway::{NowPlaying, RadioDjClient};
use crate::queue::{ItemDraft, MemoryQueueStore};
use crate::scheduler::{AutomationContext, AutomationPlan, ControlMode};
use crate::session::PlayerSession;

/// Items to queue at start-up, with optional overrides for the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowFile {
    pub items: Vec<ItemDraft>,
    pub mode: Option<ControlMode>,
    pub top40: Option<bool>,
}

impl ShowFile {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read show {}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("Invalid show {}: {}", path.display(), e))
    }

    /// Teach the simulated decks each item's length.
    pub fn register(&self, catalog: &SimCatalog) {
        for item in &self.items {
            if let Some(url) = item.url.as_deref() {
                catalog.insert(url, item.duration.unwrap_or(DEFAULT_SIM_DURATION));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Return once nothing is on air and the queue is empty.
    pub exit_when_idle: bool,
}

type PlanResult = (AutomationContext, Result<AutomationPlan, String>);

/// Run a show until Ctrl+C (or until idle, if asked).
pub async fn run(config: AutomatorConfig, show: ShowFile, options: RunOptions) -> Result<(), String> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let catalog = SimCatalog::new();
    show.register(&catalog);

    let radiodj = RadioDjClient::from_config(&config.radiodj)?;
    let tick_every = Duration::from_millis(config.tick_interval_ms.max(1));
    let plan_every = Duration::from_millis(config.automation_interval_ms.max(1));
    let poll_every = Duration::from_millis(config.radiodj.poll_interval_ms.max(1));

    let mut session = PlayerSession::simulated(
        config,
        clock,
        catalog,
        Box::new(MemoryQueueStore::new()),
    )?;
    if let Some(mode) = show.mode {
        session.set_mode(mode);
    }
    if let Some(top40) = show.top40 {
        session.set_top40(top40);
    }
    log::info!(
        "Show automator running in {} mode with {} item(s)",
        session.mode().as_str(),
        show.items.len()
    );
    for draft in show.items {
        session.enqueue(draft, None);
    }

    let (plan_tx, mut plan_rx) = mpsc::unbounded_channel::<PlanResult>();
    let (np_tx, mut np_rx) = mpsc::unbounded_channel::<Option<NowPlaying>>();
    let mut plan_in_flight = false;
    let mut poll_in_flight = false;

    let mut tick = interval(tick_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut plan_tick = interval(plan_every);
    plan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll_tick = interval(poll_every);
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                session.tick();
                if options.exit_when_idle && session.queue().is_idle() {
                    log::info!("Queue finished; exiting");
                    break;
                }
            }
            _ = plan_tick.tick(), if !plan_in_flight => {
                if let Some((context, request)) = session.automation_request() {
                    plan_in_flight = true;
                    let planner = session.planner();
                    let tx = plan_tx.clone();
                    tokio::spawn(async move {
                        let result = planner.plan(request).await;
                        let _ = tx.send((context, result));
                    });
                }
            }
            Some((context, result)) = plan_rx.recv() => {
                plan_in_flight = false;
                session.apply_plan(&context, result);
            }
            _ = poll_tick.tick(), if radiodj.is_some() && !poll_in_flight => {
                if let Some(client) = radiodj.clone() {
                    poll_in_flight = true;
                    let tx = np_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(client.now_playing().await);
                    });
                }
            }
            Some(now_playing) = np_rx.recv() => {
                poll_in_flight = false;
                if let Some(np) = now_playing.as_ref() {
                    log::debug!(
                        "[radiodj] On air: {} - {}",
                        np.artist.as_deref().unwrap_or("--"),
                        np.title.as_deref().unwrap_or("--")
                    );
                }
                session.set_now_playing(now_playing);
            }
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    log::warn!("Ctrl+C handler failed: {}", e);
                }
                log::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    session.clear();
    Ok(())
}
