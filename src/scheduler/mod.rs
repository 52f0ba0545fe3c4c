pub mod automation;
pub mod plan;
pub mod planner;

pub use automation::{AutomationScheduler, ControlMode, TimerAction};
pub use plan::{AutomationContext, AutomationPlan, FadeAction, OverlayStatus, PlanKey, PlanRequest};
pub use planner::{HttpPlanner, LocalPlanner, LocalPlannerConfig, Planner};
