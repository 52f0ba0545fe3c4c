use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analytics::{EventSink, HttpEventSink, MemoryEventSink};
use crate::audio::{FadeRamp, PlayerSettings};
use crate::audio::player::{semitone_rate, TOP40_SEMITONES};
use crate::control::AuthorityStrategy;
use crate::cue::{UrgencyThresholds, LOOP_TOLERANCE_SECS};
use crate::gateway::RadioDjConfig;
use crate::scheduler::{ControlMode, HttpPlanner, LocalPlanner, LocalPlannerConfig, Planner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    #[default]
    Local,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub kind: PlannerKind,
    /// Show-automator server, for the HTTP planner.
    pub base_url: String,
    pub timeout_ms: u64,
    pub local: LocalPlannerConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Local,
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 2000,
            local: LocalPlannerConfig::default(),
        }
    }
}

/// Every tunable of a session and of the headless runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatorConfig {
    pub tick_interval_ms: u64,
    pub automation_interval_ms: u64,
    pub fade_step: f64,
    pub fade_floor: f64,
    pub loop_tolerance: f64,
    pub prestart_margin: f64,
    pub urgent_cue_secs: f64,
    pub urgent_remaining_secs: f64,
    pub top40: bool,
    pub top40_semitones: f64,
    /// Starting mode. Falls back to what `authority` implies.
    pub mode: Option<ControlMode>,
    pub authority: AuthorityStrategy,
    /// Name shown for the external system when starting overridden.
    pub external_source: String,
    pub planner: PlannerConfig,
    /// Now-playing/log endpoint; entries stay in memory when unset.
    pub event_log_url: Option<String>,
    pub event_log_timeout_ms: u64,
    pub radiodj: RadioDjConfig,
}

impl Default for AutomatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 80,
            automation_interval_ms: 1000,
            fade_step: 0.06,
            fade_floor: 0.02,
            loop_tolerance: LOOP_TOLERANCE_SECS,
            prestart_margin: 0.25,
            urgent_cue_secs: 8.0,
            urgent_remaining_secs: 15.0,
            top40: false,
            top40_semitones: TOP40_SEMITONES,
            mode: None,
            authority: AuthorityStrategy::LocalTimer,
            external_source: "radiodj".to_string(),
            planner: PlannerConfig::default(),
            event_log_url: None,
            event_log_timeout_ms: 3000,
            radiodj: RadioDjConfig::default(),
        }
    }
}

impl AutomatorConfig {
    /// Read a JSON config. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::info!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid config: {}", e))
    }

    pub fn initial_mode(&self) -> ControlMode {
        self.mode.unwrap_or_else(|| self.authority.initial_mode())
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            ramp: FadeRamp {
                step: self.fade_step,
                floor: self.fade_floor,
            },
            top40_rate: semitone_rate(self.top40_semitones),
            prestart_margin: self.prestart_margin,
            loop_tolerance: self.loop_tolerance,
            urgency: UrgencyThresholds {
                cue_secs: self.urgent_cue_secs,
                remaining_secs: self.urgent_remaining_secs,
            },
        }
    }

    pub fn build_planner(&self) -> Result<Arc<dyn Planner>, String> {
        Ok(match self.planner.kind {
            PlannerKind::Local => Arc::new(LocalPlanner::new(self.planner.local)),
            PlannerKind::Http => Arc::new(HttpPlanner::new(
                &self.planner.base_url,
                Duration::from_millis(self.planner.timeout_ms),
            )?),
        })
    }

    pub fn build_event_sink(&self) -> Result<Box<dyn EventSink>, String> {
        Ok(match self.event_log_url.as_deref() {
            Some(url) => Box::new(HttpEventSink::new(
                url,
                Duration::from_millis(self.event_log_timeout_ms),
            )?),
            None => Box::new(MemoryEventSink::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_broadcast_timings() {
        let cfg = AutomatorConfig::default();
        assert_eq!(cfg.tick_interval_ms, 80);
        assert_eq!(cfg.automation_interval_ms, 1000);
        assert_eq!(cfg.initial_mode(), ControlMode::Manual);
        let settings = cfg.player_settings();
        assert_eq!(settings.ramp, FadeRamp::default());
        assert!((settings.top40_rate - 2f64.powf(0.5 / 12.0)).abs() < 1e-12);
        assert_eq!(settings.urgency.cue_secs, 8.0);
        assert_eq!(cfg.planner.local.fade_duration, 3.0);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let cfg = AutomatorConfig::from_json(
            r#"{"authority": "remote_planned", "fade_step": 0.1, "planner": {"kind": "http"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.initial_mode(), ControlMode::Automation);
        assert_eq!(cfg.fade_step, 0.1);
        assert_eq!(cfg.fade_floor, 0.02);
        assert_eq!(cfg.planner.kind, PlannerKind::Http);
        assert_eq!(cfg.planner.timeout_ms, 2000);
    }

    #[test]
    fn explicit_mode_wins_over_strategy() {
        let cfg = AutomatorConfig::from_json(r#"{"authority": "remote_planned", "mode": "manual"}"#).unwrap();
        assert_eq!(cfg.initial_mode(), ControlMode::Manual);
    }

    #[test]
    fn missing_file_is_default_and_malformed_is_error() {
        let dir = std::env::temp_dir().join(format!("show-automator-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let missing = dir.join("nope.json");
        assert_eq!(AutomatorConfig::load(&missing).unwrap(), AutomatorConfig::default());

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(AutomatorConfig::load(&bad).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn builds_collaborators() {
        let mut cfg = AutomatorConfig::default();
        assert!(cfg.build_planner().is_ok());
        assert!(cfg.build_event_sink().is_ok());
        cfg.planner.kind = PlannerKind::Http;
        cfg.event_log_url = Some("http://127.0.0.1:9/log".into());
        assert!(cfg.build_planner().is_ok());
        assert!(cfg.build_event_sink().is_ok());
    }
}
