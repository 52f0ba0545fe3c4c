use serde::{Deserialize, Serialize};

use crate::audio::AdvancePolicy;
use crate::scheduler::ControlMode;

/// Who currently drives the decks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Authority {
    #[default]
    Local,
    /// Another playout system is on air, e.g. RadioDJ.
    External { source: String },
}

impl Authority {
    pub fn is_local(&self) -> bool {
        matches!(self, Authority::Local)
    }
}

/// How a session is driven, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityStrategy {
    /// Operator-run; cues advance the queue on the local tick.
    #[default]
    LocalTimer,
    /// The automation planner advances the queue.
    RemotePlanned,
    /// Start under external control; local transport is locked out.
    ExternallyOverridden,
}

impl AuthorityStrategy {
    pub fn initial_mode(self) -> ControlMode {
        match self {
            Self::RemotePlanned => ControlMode::Automation,
            Self::LocalTimer | Self::ExternallyOverridden => ControlMode::Manual,
        }
    }

    pub fn initial_authority(self, external_source: &str) -> Authority {
        match self {
            Self::ExternallyOverridden => Authority::External {
                source: external_source.to_string(),
            },
            Self::LocalTimer | Self::RemotePlanned => Authority::Local,
        }
    }
}

/// Operator commands the arbiter gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportCommand {
    Play,
    Pause,
    Skip,
    Fade,
    Stop,
    /// Start a chosen queue item.
    Select,
    Overlay,
    /// Queue edits: enqueue, remove, reorder.
    Insert,
}

impl TransportCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Skip => "skip",
            Self::Fade => "fade",
            Self::Stop => "stop",
            Self::Select => "select",
            Self::Overlay => "overlay",
            Self::Insert => "insert",
        }
    }
}

/// Control-mode arbiter. While authority is external every local
/// playback command is refused; queue edits still go through.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    authority: Authority,
}

impl Arbiter {
    pub fn new(authority: Authority) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn is_overridden(&self) -> bool {
        !self.authority.is_local()
    }

    /// Returns `true` when authority actually changed.
    pub fn set_authority(&mut self, authority: Authority) -> bool {
        if authority == self.authority {
            return false;
        }
        match &authority {
            Authority::Local => log::info!("[control] Authority returned to local control"),
            Authority::External { source } => {
                log::info!("[control] Authority overridden by {}", source)
            }
        }
        self.authority = authority;
        true
    }

    pub fn permits(&self, command: TransportCommand) -> bool {
        if command == TransportCommand::Insert || self.authority.is_local() {
            return true;
        }
        log::debug!("[control] {} suppressed under external override", command.as_str());
        false
    }

    /// What the playback tick may do on its own under `mode`.
    pub fn advance_policy(&self, mode: ControlMode) -> AdvancePolicy {
        match (&self.authority, mode) {
            (Authority::External { .. }, _) => AdvancePolicy::Held,
            (Authority::Local, ControlMode::Manual) => AdvancePolicy::Local,
            (Authority::Local, ControlMode::Automation) => AdvancePolicy::Planned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radiodj() -> Authority {
        Authority::External {
            source: "radiodj".into(),
        }
    }

    #[test]
    fn local_authority_permits_everything() {
        let arbiter = Arbiter::default();
        for cmd in [
            TransportCommand::Play,
            TransportCommand::Pause,
            TransportCommand::Skip,
            TransportCommand::Fade,
            TransportCommand::Stop,
            TransportCommand::Select,
            TransportCommand::Overlay,
            TransportCommand::Insert,
        ] {
            assert!(arbiter.permits(cmd), "{:?}", cmd);
        }
    }

    #[test]
    fn override_blocks_transport_but_not_inserts() {
        let arbiter = Arbiter::new(radiodj());
        assert!(arbiter.is_overridden());
        assert!(!arbiter.permits(TransportCommand::Play));
        assert!(!arbiter.permits(TransportCommand::Fade));
        assert!(!arbiter.permits(TransportCommand::Stop));
        assert!(arbiter.permits(TransportCommand::Insert));
    }

    #[test]
    fn advance_policy_follows_mode_and_authority() {
        let mut arbiter = Arbiter::default();
        assert_eq!(arbiter.advance_policy(ControlMode::Manual), AdvancePolicy::Local);
        assert_eq!(arbiter.advance_policy(ControlMode::Automation), AdvancePolicy::Planned);
        assert!(arbiter.set_authority(radiodj()));
        assert!(!arbiter.set_authority(radiodj()));
        assert_eq!(arbiter.advance_policy(ControlMode::Manual), AdvancePolicy::Held);
        assert!(arbiter.set_authority(Authority::Local));
        assert!(arbiter.permits(TransportCommand::Skip));
    }

    #[test]
    fn strategy_picks_starting_point() {
        assert_eq!(AuthorityStrategy::RemotePlanned.initial_mode(), ControlMode::Automation);
        assert_eq!(AuthorityStrategy::LocalTimer.initial_authority("radiodj"), Authority::Local);
        assert_eq!(
            AuthorityStrategy::ExternallyOverridden.initial_authority("radiodj"),
            radiodj()
        );
        let s: AuthorityStrategy = serde_json::from_str("\"externally_overridden\"").unwrap();
        assert_eq!(s, AuthorityStrategy::ExternallyOverridden);
    }
}
