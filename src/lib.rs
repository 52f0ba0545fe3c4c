//! Show automator core: cue model, queue, dual-deck player, automation
//! scheduler and control-mode arbiter for live radio playout.

pub mod analytics;
pub mod audio;
pub mod clock;
pub mod config;
pub mod control;
pub mod cue;
pub mod gateway;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod session;

pub use config::AutomatorConfig;
pub use session::PlayerSession;
