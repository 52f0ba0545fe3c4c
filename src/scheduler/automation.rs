/// Automation scheduler
///
/// Owns the control mode and turns planner output into timers. A new plan
/// replaces every pending timer; a plan with the same key as the last one
/// is ignored so repeated ticks do not re-arm.
use serde::{Deserialize, Serialize};

use super::plan::{AutomationContext, AutomationPlan, FadeAction, OverlayStatus, PlanKey};
use crate::queue::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Cue-driven local auto-advance on the playback tick.
    #[default]
    Manual,
    /// Planner-driven; local auto-advance is suppressed.
    Automation,
}

impl ControlMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "automation" | "auto" => Self::Automation,
            _ => Self::Manual,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automation => "automation",
        }
    }
}

/// What a fired timer asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerAction {
    PlayOverlay(ItemId),
    Fade(FadeAction),
}

#[derive(Debug, Clone, PartialEq)]
struct ArmedTimer {
    due: f64,
    /// Current item when the timer was armed.
    for_current: ItemId,
    action: TimerAction,
}

#[derive(Debug, Default)]
pub struct AutomationScheduler {
    mode: ControlMode,
    plan_key: Option<PlanKey>,
    plan: Option<AutomationPlan>,
    timers: Vec<ArmedTimer>,
}

impl AutomationScheduler {
    pub fn new(mode: ControlMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn is_automation(&self) -> bool {
        self.mode == ControlMode::Automation
    }

    /// Switch mode. Any change cancels pending timers and forgets the plan.
    pub fn set_mode(&mut self, mode: ControlMode) -> bool {
        if mode == self.mode {
            return false;
        }
        log::info!("[automation] Mode {} -> {}", self.mode.as_str(), mode.as_str());
        self.mode = mode;
        self.cancel();
        self.plan = None;
        true
    }

    pub fn plan(&self) -> Option<&AutomationPlan> {
        self.plan.as_ref()
    }

    pub fn plan_key(&self) -> Option<&PlanKey> {
        self.plan_key.as_ref()
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Adopt a plan made for `context`. Returns `true` when timers were
    /// re-armed, `false` when the plan matched the previous key.
    pub fn apply_plan(&mut self, plan: AutomationPlan, context: &AutomationContext, now: f64) -> bool {
        let key = PlanKey::new(&plan, context);
        if self.plan_key.as_ref() == Some(&key) {
            self.plan = Some(plan);
            return false;
        }
        log::debug!("[automation] New plan {}", key.as_str());
        self.timers.clear();
        self.plan_key = Some(key);
        let current = context.current.id;

        if !plan.paused {
            if let (Some(overlay), Some(item)) = (plan.overlay.as_ref(), context.overlay.as_ref()) {
                if overlay.status == OverlayStatus::Scheduled {
                    self.timers.push(ArmedTimer {
                        due: now + overlay.start_in.max(0.0),
                        for_current: current,
                        action: TimerAction::PlayOverlay(item.id),
                    });
                }
            }
            if let Some(fade) = plan.fade.as_ref().filter(|f| f.action.is_armed()) {
                if let Some(start_in) = fade.start_in {
                    self.timers.push(ArmedTimer {
                        due: now + start_in.max(0.0),
                        for_current: current,
                        action: TimerAction::Fade(fade.action),
                    });
                }
            }
        }
        self.plan = Some(plan);
        true
    }

    /// Drop every pending timer and the plan key, so the next plan re-arms.
    pub fn cancel(&mut self) {
        if !self.timers.is_empty() {
            log::debug!("[automation] Cancelled {} timer(s)", self.timers.len());
        }
        self.timers.clear();
        self.plan_key = None;
    }

    /// Cancel timers armed for a different current item.
    pub fn note_current(&mut self, current: Option<ItemId>) {
        if self.timers.iter().any(|t| Some(t.for_current) != current) {
            self.cancel();
        }
    }

    /// Timers due at `now`. Fired timers are removed; ones armed for an
    /// item that is no longer current are discarded.
    pub fn due(&mut self, now: f64, current: Option<ItemId>) -> Vec<TimerAction> {
        if !self.is_automation() {
            self.timers.clear();
            return Vec::new();
        }
        let (fired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.due <= now);
        self.timers = pending;
        fired
            .into_iter()
            .filter_map(|t| {
                if Some(t.for_current) == current {
                    Some(t.action)
                } else {
                    log::debug!("[automation] Discarded stale {:?} timer", t.action);
                    None
                }
            })
            .collect()
    }
}
