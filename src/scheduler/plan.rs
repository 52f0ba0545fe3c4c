use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cue::CuePoints;
use crate::queue::{ItemKind, QueueItem, QueueManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeAction {
    Crossfade,
    FadeOut,
    #[default]
    #[serde(rename = "none")]
    Idle,
}

impl FadeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FadeAction::Crossfade => "crossfade",
            FadeAction::FadeOut => "fade_out",
            FadeAction::Idle => "none",
        }
    }

    /// Actions that arm a fade timer.
    pub fn is_armed(self) -> bool {
        matches!(self, FadeAction::Crossfade | FadeAction::FadeOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayStatus {
    Scheduled,
    Deferred,
    #[default]
    #[serde(alias = "none")]
    Idle,
}

impl OverlayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayStatus::Scheduled => "scheduled",
            OverlayStatus::Deferred => "deferred",
            OverlayStatus::Idle => "idle",
        }
    }
}

/// Closed time window in seconds of the current item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanWindow {
    pub start: f64,
    pub end: f64,
}

impl PlanWindow {
    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FadePlan {
    #[serde(default)]
    pub action: FadeAction,
    #[serde(default)]
    pub start_in: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlayPlan {
    #[serde(default)]
    pub status: OverlayStatus,
    #[serde(default)]
    pub start_in: f64,
    #[serde(default)]
    pub window: Option<PlanWindow>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub span_transition: bool,
    #[serde(default)]
    pub reason: String,
}

/// Planner output for one automation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AutomationPlan {
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_primary_deck: Option<String>,
    #[serde(default)]
    pub fade: Option<FadePlan>,
    #[serde(default)]
    pub overlay: Option<OverlayPlan>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub countdowns: BTreeMap<String, f64>,
}

impl AutomationPlan {
    pub fn fade_action(&self) -> FadeAction {
        self.fade.as_ref().map(|f| f.action).unwrap_or_default()
    }

    pub fn overlay_status(&self) -> OverlayStatus {
        self.overlay.as_ref().map(|o| o.status).unwrap_or_default()
    }
}

/// What the planner is told about an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProjection {
    pub kind: ItemKind,
    pub title: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub cues: CuePoints,
}

impl ItemProjection {
    pub fn of(item: &QueueItem, duration: Option<f64>) -> Self {
        Self {
            kind: item.kind,
            title: item.title.clone(),
            duration: duration.or(item.duration).unwrap_or(0.0),
            cues: item.cues(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub current_position: f64,
    pub current: Option<ItemProjection>,
    pub next: Option<ItemProjection>,
    pub overlay: Option<ItemProjection>,
}

/// Items a plan is made for: the current item, the first overlay
/// candidate and the first main-deck item still queued.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationContext {
    pub current: QueueItem,
    pub overlay: Option<QueueItem>,
    pub next: Option<QueueItem>,
    /// A stop marker comes before any other main-deck item.
    pub stop_ahead: bool,
}

impl AutomationContext {
    pub fn from_queue(queue: &QueueManager) -> Option<Self> {
        let first_main = queue.items().iter().find(|i| !i.is_overlay_eligible());
        Some(Self {
            current: queue.current()?.clone(),
            overlay: queue.first_overlay_eligible().cloned(),
            next: queue.first_primary().cloned(),
            stop_ahead: first_main.is_some_and(QueueItem::is_stop),
        })
    }

    /// Planner request. A pending stop marker is projected as the next
    /// item so the planner can pause.
    pub fn request(&self, position: f64, current_duration: Option<f64>) -> PlanRequest {
        let next = if self.stop_ahead {
            Some(ItemProjection {
                kind: ItemKind::Stop,
                title: "STOP".to_string(),
                duration: 0.0,
                cues: CuePoints::default(),
            })
        } else {
            self.next.as_ref().map(|i| ItemProjection::of(i, None))
        };
        PlanRequest {
            current_position: position,
            current: Some(ItemProjection::of(&self.current, current_duration)),
            next,
            overlay: self.overlay.as_ref().map(|i| ItemProjection::of(i, None)),
        }
    }
}

/// Identity of a plan for de-duplication:
/// `current|overlay|next|paused-or-active|fade action|overlay status`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey(String);

impl PlanKey {
    pub fn new(plan: &AutomationPlan, context: &AutomationContext) -> Self {
        let id = |item: Option<&QueueItem>| item.map(|i| i.id.to_string()).unwrap_or_default();
        PlanKey(format!(
            "{}|{}|{}|{}|{}|{}",
            context.current.id,
            id(context.overlay.as_ref()),
            id(context.next.as_ref()),
            if plan.paused { "paused" } else { "active" },
            plan.fade_action().as_str(),
            plan.overlay_status().as_str(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ItemDraft;

    fn context() -> AutomationContext {
        let mut q = QueueManager::new();
        q.enqueue(ItemDraft::new("cur", ItemKind::Music), None);
        q.enqueue(ItemDraft::new("vt", ItemKind::VoiceTrack), None);
        q.enqueue(ItemDraft::stop_marker(), None);
        q.enqueue(ItemDraft::new("next", ItemKind::Psa), None);
        let cur = q.take_head().unwrap();
        q.set_current(cur);
        AutomationContext::from_queue(&q).unwrap()
    }

    #[test]
    fn context_picks_overlay_and_next_around_stops() {
        let ctx = context();
        assert_eq!(ctx.current.title, "cur");
        assert_eq!(ctx.overlay.as_ref().map(|i| i.title.as_str()), Some("vt"));
        assert_eq!(ctx.next.as_ref().map(|i| i.title.as_str()), Some("next"));
        assert!(ctx.stop_ahead);
        let req = ctx.request(3.0, Some(200.0));
        assert_eq!(req.next.as_ref().map(|p| p.kind), Some(ItemKind::Stop));
        assert_eq!(req.current.as_ref().map(|p| p.duration), Some(200.0));
    }

    #[test]
    fn plan_key_matches_for_identical_plans() {
        let ctx = context();
        let plan = AutomationPlan {
            fade: Some(FadePlan {
                action: FadeAction::Crossfade,
                start_in: Some(4.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut later = plan.clone();
        if let Some(f) = later.fade.as_mut() {
            f.start_in = Some(3.0);
        }
        assert_eq!(PlanKey::new(&plan, &ctx), PlanKey::new(&later, &ctx));
        assert_eq!(PlanKey::new(&plan, &ctx).as_str(), "1|2|4|active|crossfade|idle");

        let paused = AutomationPlan {
            paused: true,
            ..plan.clone()
        };
        assert_ne!(PlanKey::new(&plan, &ctx), PlanKey::new(&paused, &ctx));
    }

    #[test]
    fn plan_parses_server_json() {
        let json = r#"{
            "paused": false,
            "next_primary_deck": "psa",
            "overlay": {"status": "scheduled", "start_in": 1.5, "window": {"start": 10, "end": 20},
                        "duration": 6, "span_transition": false, "reason": "outro_window"},
            "fade": {"action": "none", "reason": "no_cues"},
            "countdowns": {"overlay_in": 1.5}
        }"#;
        let plan: AutomationPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.overlay_status(), OverlayStatus::Scheduled);
        assert_eq!(plan.fade_action(), FadeAction::Idle);
        assert_eq!(plan.overlay.as_ref().and_then(|o| o.window).map(|w| w.len()), Some(10.0));

        let legacy: OverlayPlan = serde_json::from_str(r#"{"status": "none"}"#).unwrap();
        assert_eq!(legacy.status, OverlayStatus::Idle);
    }
}
