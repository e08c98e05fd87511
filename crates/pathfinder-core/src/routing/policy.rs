//! Contract shared by the contextual bandits
//!
//! The doubly-robust and offset-tree bandits are parallel alternatives to
//! the Thompson Sampling router. A caller picks one per use case and talks
//! to it through [`ContextualPolicy`]; [`SharedPolicy`] makes any policy
//! safe to share between threads and persists its snapshot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::ContextVector;
use super::doubly_robust::DoublyRobustState;
use super::offset_tree::OffsetTreeState;
use super::snapshot::SnapshotFile;
use crate::error::{Error, Result};

/// Persisted snapshot of a contextual policy, tagged with the policy type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PolicyState {
    DoublyRobust(DoublyRobustState),
    OffsetTree(OffsetTreeState),
}

impl PolicyState {
    /// Name of the policy this snapshot belongs to
    pub fn policy_name(&self) -> &'static str {
        match self {
            Self::DoublyRobust(_) => "doubly_robust",
            Self::OffsetTree(_) => "offset_tree",
        }
    }
}

/// Global per-arm summary reported by every contextual policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub count: u64,
    pub q_value: f64,
}

/// Per-arm summaries keyed by arm
pub type PolicyStatistics = BTreeMap<String, ArmSummary>;

/// Context-aware arm selection
pub trait ContextualPolicy: Send {
    /// Choose an arm for `context`; `InvalidArgument` when `candidates` is empty
    fn recommend(&mut self, context: &ContextVector, candidates: &[String]) -> Result<String>;

    /// Learn from an observed reward; the reward is clamped into `[0, 1]`
    fn update(&mut self, arm: &str, reward: f64, context: &ContextVector) -> Result<()>;

    /// Global per-arm summaries
    fn statistics(&self) -> PolicyStatistics;

    /// Serializable snapshot of the policy
    fn to_state(&self) -> PolicyState;

    /// Rebuild a policy from a snapshot
    fn from_state(state: PolicyState) -> Result<Self>
    where
        Self: Sized;
}

pub(crate) fn require_candidates(candidates: &[String]) -> Result<()> {
    if candidates.is_empty() {
        return Err(Error::InvalidArgument(
            "candidates must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn require_finite_reward(reward: f64) -> Result<f64> {
    if !reward.is_finite() {
        return Err(Error::InvalidArgument(format!(
            "reward must be finite, got {}",
            reward
        )));
    }
    Ok(reward.clamp(0.0, 1.0))
}

/// Thread-safe wrapper around a contextual policy with periodic persistence
pub struct SharedPolicy<P: ContextualPolicy> {
    policy: Mutex<P>,
    snapshot: Option<SnapshotFile>,
    persist_every: u64,
    updates: AtomicU64,
    save_lock: Mutex<()>,
}

impl<P: ContextualPolicy> SharedPolicy<P> {
    /// Wrap a policy without persistence
    pub fn new(policy: P) -> Self {
        Self {
            policy: Mutex::new(policy),
            snapshot: None,
            persist_every: 10,
            updates: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }

    /// Wrap a policy persisted at `path`
    ///
    /// An existing snapshot replaces `fallback`; a missing, corrupt, or
    /// mismatched snapshot keeps `fallback` and logs a warning.
    pub fn with_snapshot(fallback: P, path: impl Into<PathBuf>, persist_every: u64) -> Self {
        let file = SnapshotFile::new(path);
        let policy = match file.try_load::<PolicyState>() {
            Ok(Some(state)) => match P::from_state(state) {
                Ok(policy) => {
                    info!(path = %file.path().display(), "Loaded policy snapshot");
                    policy
                }
                Err(e) => {
                    warn!(path = %file.path().display(), error = %e, "Ignoring incompatible policy snapshot");
                    fallback
                }
            },
            Ok(None) => fallback,
            Err(e) => {
                warn!(path = %file.path().display(), error = %e, "Ignoring unreadable policy snapshot");
                fallback
            }
        };

        Self {
            policy: Mutex::new(policy),
            snapshot: Some(file),
            persist_every: persist_every.max(1),
            updates: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, P> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Choose an arm for `context`
    pub fn recommend(&self, context: &ContextVector, candidates: &[String]) -> Result<String> {
        self.lock().recommend(context, candidates)
    }

    /// Learn from a reward; returns `false` only when a due snapshot write failed
    pub fn update(&self, arm: &str, reward: f64, context: &ContextVector) -> Result<bool> {
        self.lock().update(arm, reward, context)?;

        let count = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.snapshot.is_some() && count % self.persist_every == 0 {
            if let Err(e) = self.save() {
                warn!(error = %e, "Failed to persist policy snapshot");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run a closure with exclusive access to the policy
    pub fn with_policy<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.lock())
    }

    /// Global per-arm summaries
    pub fn statistics(&self) -> PolicyStatistics {
        self.lock().statistics()
    }

    /// Snapshot of the wrapped policy
    pub fn to_state(&self) -> PolicyState {
        self.lock().to_state()
    }

    /// Persist the snapshot now; the policy lock is released before writing
    pub fn save(&self) -> Result<()> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.to_state();
        file.save(&state)
    }
}
