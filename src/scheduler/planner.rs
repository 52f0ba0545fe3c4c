//! Automation planners.
//!
//! A planner turns the current position and item projections into an
//! [`AutomationPlan`]. The local planner runs in-process; the HTTP planner
//! asks a show-automator server.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use super::plan::{
    AutomationPlan, FadeAction, FadePlan, ItemProjection, OverlayPlan, OverlayStatus, PlanRequest,
    PlanWindow,
};
use crate::queue::ItemKind;

/// Automation planner collaborator.
pub trait Planner: Send + Sync {
    fn plan(&self, request: PlanRequest) -> BoxFuture<'static, Result<AutomationPlan, String>>;

    /// Lift a sticky pause, e.g. after the operator restarts playback.
    fn resume(&self) {}
}

// ── Local planner ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPlannerConfig {
    /// Fade-to-silence length ahead of `cue_out`.
    pub fade_duration: f64,
    pub crossfade_duration: f64,
    pub minimum_overlay_gap: f64,
}

impl Default for LocalPlannerConfig {
    fn default() -> Self {
        Self {
            fade_duration: 3.0,
            crossfade_duration: 2.0,
            minimum_overlay_gap: 0.5,
        }
    }
}

/// Primary lanes the planner alternates between.
const PRIMARY_LANES: [ItemKind; 2] = [ItemKind::Music, ItemKind::Psa];

#[derive(Debug, Default)]
struct LocalPlannerState {
    paused: bool,
    pause_reason: Option<String>,
    last_primary: Option<ItemKind>,
    last_plan: Option<AutomationPlan>,
}

impl LocalPlannerState {
    fn next_primary_lane(&self) -> ItemKind {
        match self.last_primary {
            Some(ItemKind::Music) => ItemKind::Psa,
            _ => ItemKind::Music,
        }
    }

    fn pause(&mut self, reason: &str) {
        if !self.paused {
            log::info!("[automation] Paused: {}", reason);
        }
        self.paused = true;
        self.pause_reason = Some(reason.to_string());
    }
}

/// In-process planner. Clones share pause and lane state.
#[derive(Debug, Clone, Default)]
pub struct LocalPlanner {
    config: LocalPlannerConfig,
    state: Arc<Mutex<LocalPlannerState>>,
}

impl LocalPlanner {
    pub fn new(config: LocalPlannerConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().map(|s| s.paused).unwrap_or(false)
    }

    pub fn last_plan(&self) -> Option<AutomationPlan> {
        self.state.lock().ok().and_then(|s| s.last_plan.clone())
    }

    /// Build the plan for one automation tick.
    pub fn plan_step(&self, request: &PlanRequest) -> Result<AutomationPlan, String> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| format!("Planner state poisoned: {}", e))?;
        if let Some(kind) = request.current.as_ref().map(|c| c.kind) {
            if PRIMARY_LANES.contains(&kind) {
                state.last_primary = Some(kind);
            }
        }

        if request.next.as_ref().is_some_and(|n| n.kind == ItemKind::Stop) {
            state.pause("stop_item");
        }

        let plan = if state.paused {
            paused_plan(&state, request)
        } else {
            let overlay = plan_overlay(request, &self.config);
            let fade = plan_fade(request, &self.config);
            let mut countdowns = BTreeMap::new();
            if overlay.status == OverlayStatus::Scheduled {
                countdowns.insert("overlay_in".to_string(), overlay.start_in);
            }
            if let Some(start_in) = fade.start_in {
                countdowns.insert("fade_in".to_string(), start_in);
            }
            AutomationPlan {
                paused: false,
                pause_reason: None,
                next_primary_deck: Some(state.next_primary_lane().as_str().to_string()),
                fade: Some(fade),
                overlay: Some(overlay),
                countdowns,
            }
        };
        state.last_plan = Some(plan.clone());
        Ok(plan)
    }
}

impl Planner for LocalPlanner {
    fn plan(&self, request: PlanRequest) -> BoxFuture<'static, Result<AutomationPlan, String>> {
        futures_util::future::ready(self.plan_step(&request)).boxed()
    }

    fn resume(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.paused {
                log::info!("[automation] Resumed");
            }
            state.paused = false;
            state.pause_reason = None;
        }
    }
}

fn paused_plan(state: &LocalPlannerState, request: &PlanRequest) -> AutomationPlan {
    AutomationPlan {
        paused: true,
        pause_reason: state.pause_reason.clone(),
        next_primary_deck: Some(state.next_primary_lane().as_str().to_string()),
        overlay: Some(OverlayPlan {
            status: OverlayStatus::Deferred,
            start_in: 0.0,
            window: None,
            duration: request.overlay.as_ref().map(|o| o.duration).unwrap_or(0.0),
            span_transition: false,
            reason: "automation_paused".to_string(),
        }),
        fade: Some(FadePlan {
            action: FadeAction::Idle,
            reason: "automation_paused".to_string(),
            ..Default::default()
        }),
        countdowns: BTreeMap::new(),
    }
}

fn known_duration(item: &ItemProjection) -> Option<f64> {
    Some(item.duration).filter(|d| *d > 0.0)
}

/// From now until the intro cue, if it is still ahead.
fn intro_window(current: &ItemProjection, position: f64) -> Option<PlanWindow> {
    let intro = current.cues.intro()?;
    let end = intro.min(known_duration(current).unwrap_or(intro));
    (end > position).then_some(PlanWindow {
        start: position,
        end,
    })
}

/// From the outro cue (or now, if later) until cue_out or the end.
fn outro_window(current: &ItemProjection, position: f64) -> Option<PlanWindow> {
    let outro = current.cues.outro()?;
    let end = current
        .cues
        .cue_out()
        .filter(|c| *c > 0.0)
        .or_else(|| known_duration(current))
        .unwrap_or(outro);
    let start = outro.max(position);
    (end > start).then_some(PlanWindow { start, end })
}

fn next_intro_len(next: Option<&ItemProjection>) -> f64 {
    next.and_then(|n| n.cues.intro()).map(|i| i.max(0.0)).unwrap_or(0.0)
}

fn next_safe_window_start(current: &ItemProjection, position: f64) -> f64 {
    let cues = &current.cues;
    if let Some(outro) = cues.outro().filter(|o| *o > position) {
        return outro;
    }
    if let Some(cue_out) = cues.cue_out().filter(|c| *c > position) {
        return cue_out;
    }
    known_duration(current).unwrap_or(position)
}

fn plan_overlay(request: &PlanRequest, config: &LocalPlannerConfig) -> OverlayPlan {
    let Some(overlay) = request.overlay.as_ref().filter(|o| o.kind.is_overlay_eligible()) else {
        return OverlayPlan {
            status: OverlayStatus::Idle,
            reason: "no_overlay".to_string(),
            ..Default::default()
        };
    };
    let duration = overlay.duration.max(0.0);
    let Some(current) = request.current.as_ref() else {
        return OverlayPlan {
            status: OverlayStatus::Deferred,
            duration,
            reason: "no_current".to_string(),
            ..Default::default()
        };
    };
    let position = request.current_position;
    let scheduled = |window: PlanWindow, span_transition: bool, reason: &str| OverlayPlan {
        status: OverlayStatus::Scheduled,
        start_in: (window.start - position).max(0.0),
        window: Some(window),
        duration,
        span_transition,
        reason: reason.to_string(),
    };

    if let Some(window) = intro_window(current, position) {
        if duration <= window.len() {
            return scheduled(window, false, "intro_window");
        }
    }

    let outro = outro_window(current, position);
    if let Some(window) = outro {
        if duration <= window.len() {
            return scheduled(window, false, "outro_window");
        }
        let intro_len = next_intro_len(request.next.as_ref());
        if intro_len > 0.0 && duration <= window.len() + intro_len {
            let spanning = PlanWindow {
                start: window.start,
                end: window.end + intro_len,
            };
            return scheduled(spanning, true, "outro_to_intro");
        }
    }

    let defer_to = next_safe_window_start(current, position);
    log::debug!(
        "[automation] Overlay '{}' ({:.1}s) deferred; gap >= {:.1}s needed from {:.1}s",
        overlay.title,
        duration,
        config.minimum_overlay_gap,
        defer_to
    );
    OverlayPlan {
        status: OverlayStatus::Deferred,
        start_in: (defer_to - position).max(0.0),
        window: None,
        duration,
        span_transition: false,
        reason: "no_safe_window".to_string(),
    }
}

fn plan_fade(request: &PlanRequest, config: &LocalPlannerConfig) -> FadePlan {
    let Some(current) = request.current.as_ref() else {
        return FadePlan {
            action: FadeAction::Idle,
            reason: "no_current".to_string(),
            ..Default::default()
        };
    };
    let position = request.current_position;
    let cues = &current.cues;
    let crossfade = |at: f64, reason: &str| FadePlan {
        action: FadeAction::Crossfade,
        start_in: Some((at - position).max(0.0)),
        duration: Some(config.crossfade_duration),
        reason: reason.to_string(),
    };

    if let Some(start_next) = cues.start_next() {
        return crossfade(start_next, "start_next");
    }
    if let Some(outro) = cues.outro() {
        if request.next.as_ref().and_then(|n| n.cues.intro()).is_some() {
            return crossfade(outro, "outro_intro");
        }
    }
    if let Some(cue_out) = cues.cue_out() {
        return FadePlan {
            action: FadeAction::FadeOut,
            start_in: Some((cue_out - position - config.fade_duration).max(0.0)),
            duration: Some(config.fade_duration),
            reason: "cue_out".to_string(),
        };
    }
    FadePlan {
        action: FadeAction::Idle,
        reason: "no_cues".to_string(),
        ..Default::default()
    }
}

// ── HTTP planner ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlanResponse {
    plan: AutomationPlan,
}

/// Asks a show-automator server for each plan.
#[derive(Debug, Clone)]
pub struct HttpPlanner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPlanner {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build planner client: {}", e))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/show-automator/plan", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Planner for HttpPlanner {
    fn plan(&self, request: PlanRequest) -> BoxFuture<'static, Result<AutomationPlan, String>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        async move {
            let resp = client
                .post(&endpoint)
                .json(&request)
                .send()
                .await
                .map_err(|e| format!("Planner request failed: {e}"))?;
            if !resp.status().is_success() {
                return Err(format!("Planner returned HTTP {}", resp.status()));
            }
            let body = resp
                .json::<PlanResponse>()
                .await
                .map_err(|e| format!("Planner JSON parse error: {e}"))?;
            Ok(body.plan)
        }
        .boxed()
    }
}
