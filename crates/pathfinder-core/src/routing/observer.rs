//! Observability hooks for routing decisions
//!
//! The metrics backend is an external collaborator. The router reports
//! selections and rewards through [`RoutingObserver`]; the default
//! implementation turns them into structured `tracing` events.

use tracing::debug;

use super::types::Phase;

/// Receives selection and reward observations from the router
pub trait RoutingObserver: Send + Sync {
    /// Called once per routing decision
    fn on_selection(&self, task: &str, arm: &str, phase: Phase);

    /// Called after a reward updated an arm's posterior
    fn on_reward(&self, task: &str, arm: &str, reward: f64, posterior_mean: f64);
}

/// Emits observations as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RoutingObserver for TracingObserver {
    fn on_selection(&self, task: &str, arm: &str, phase: Phase) {
        debug!(
            target: "pathfinder::metrics",
            task = %task,
            arm = %arm,
            phase = %phase,
            "routing.selection"
        );
    }

    fn on_reward(&self, task: &str, arm: &str, reward: f64, posterior_mean: f64) {
        debug!(
            target: "pathfinder::metrics",
            task = %task,
            arm = %arm,
            reward = reward,
            posterior_mean = posterior_mean,
            "routing.reward"
        );
    }
}
