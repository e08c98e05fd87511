//! Types shared by the routing policies
//!
//! This module defines the routing key that scopes an independent set of
//! posteriors, the routing phase, and the decision/statistics records the
//! router hands back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::posterior::Posterior;

/// Tenant used when the caller does not supply one
pub const DEFAULT_TENANT: &str = "default";

/// Compound identity scoping one independent set of posteriors
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingKey {
    /// Tenant (organisation, guild, workspace...)
    pub tenant: String,
    /// Task type (e.g. "summarize", "classify")
    pub task: String,
}

impl RoutingKey {
    /// Create a new routing key, resolving an empty tenant to the default
    pub fn new(tenant: Option<&str>, task: impl Into<String>) -> Self {
        let tenant = match tenant {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => DEFAULT_TENANT.to_string(),
        };
        Self {
            tenant,
            task: task.into(),
        }
    }

    /// Whether this key belongs to the given task type
    pub fn matches_task(&self, task: &str) -> bool {
        self.task == task
    }
}

/// Escape `%` and `:` so the first `:` of a rendered key always ends the tenant
fn escape_tenant(tenant: &str) -> String {
    tenant.replace('%', "%25").replace(':', "%3A")
}

fn unescape_tenant(escaped: &str) -> String {
    escaped.replace("%3A", ":").replace("%25", "%")
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", escape_tenant(&self.tenant), self.task)
    }
}

impl std::str::FromStr for RoutingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((tenant, task)) if !tenant.is_empty() => Ok(Self {
                tenant: unescape_tenant(tenant),
                task: task.to_string(),
            }),
            _ => Err(format!("Invalid routing key (expected tenant:task): {}", s)),
        }
    }
}

/// Learning phase of one routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Pure random exploration until enough trials accumulate
    ColdStart,
    /// Thompson sampling (or argmax of means when deterministic)
    SteadyState,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ColdStart => write!(f, "cold_start"),
            Self::SteadyState => write!(f, "steady_state"),
        }
    }
}

/// Reason for a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    /// Router disabled; first candidate returned
    Disabled,
    /// Only one candidate was offered
    SingleCandidate,
    /// Uniform random choice during cold start
    Exploration,
    /// Highest Thompson sample
    Sampled { sampled_value: f64 },
    /// Highest posterior mean
    Exploitation { expected_reward: f64 },
}

/// Result of a routing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Unique identifier for correlating the later reward
    pub decision_id: String,
    /// The routing key this decision was made under
    pub routing_key: RoutingKey,
    /// Selected arm
    pub arm: String,
    /// Phase of the routing key at decision time
    pub phase: Phase,
    /// Reason for selection
    pub reason: RoutingReason,
    /// Other candidates that were considered
    pub alternatives: Vec<String>,
}

impl RoutingDecision {
    /// Create a new routing decision
    pub fn new(
        routing_key: RoutingKey,
        arm: impl Into<String>,
        phase: Phase,
        reason: RoutingReason,
    ) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            routing_key,
            arm: arm.into(),
            phase,
            reason,
            alternatives: Vec::new(),
        }
    }

    /// Add alternative arms
    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }
}

/// Summary of one arm's posterior, as reported by `get_statistics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatistics {
    pub mean: f64,
    pub alpha: f64,
    pub beta: f64,
    pub trials: u64,
    pub last_updated: DateTime<Utc>,
}

impl From<&Posterior> for ArmStatistics {
    fn from(p: &Posterior) -> Self {
        Self {
            mean: p.mean(),
            alpha: p.alpha,
            beta: p.beta,
            trials: p.trials,
            last_updated: p.last_updated,
        }
    }
}

/// Statistics keyed by rendered routing key, then by arm
pub type RouterStatistics = BTreeMap<String, BTreeMap<String, ArmStatistics>>;
