//! Thompson Sampling Multi-Armed Bandit for model selection
//!
//! This module implements Thompson Sampling, a Bayesian approach to the
//! explore/exploit dilemma. Each arm under a routing key maintains a
//! Beta distribution over its expected reward, and we sample from these
//! distributions to make selection decisions.
//!
//! ## Algorithm Overview
//!
//! 1. While a routing key has seen fewer than `cold_start_trials` rewards,
//!    pick uniformly at random (pure exploration)
//! 2. Afterwards, for each candidate sample θ ~ Beta(α, β)
//! 3. Select the candidate with the highest sampled value
//! 4. Observe reward and update: α += reward, β += (1 - reward)
//!
//! The cold-start to steady-state transition is one-way: trial counts only
//! ever grow.

use rand::prelude::*;
use std::collections::BTreeMap;

use super::posterior::Posterior;
use super::types::{ArmStatistics, Phase, RouterStatistics, RoutingKey, RoutingReason};
use crate::error::{Error, Result};

/// Posterior map persisted by the router: rendered key -> arm -> posterior
pub type RouterSnapshot = BTreeMap<String, BTreeMap<String, Posterior>>;

/// Default number of rewards a key must see before leaving cold start
pub const DEFAULT_COLD_START_TRIALS: u64 = 10;

/// Outcome of one bandit selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub arm: String,
    pub phase: Phase,
    pub reason: RoutingReason,
}

/// Thompson Sampling bandit over per-key posterior sets
#[derive(Debug)]
pub struct ThompsonSamplingBandit {
    /// Posteriors for each (routing_key, arm) pair
    posteriors: RouterSnapshot,
    /// Trials required before a key leaves cold start
    cold_start_trials: u64,
    /// Random number generator
    rng: StdRng,
}

impl Default for ThompsonSamplingBandit {
    fn default() -> Self {
        Self::new()
    }
}

impl ThompsonSamplingBandit {
    /// Create a new bandit with default parameters
    pub fn new() -> Self {
        Self {
            posteriors: BTreeMap::new(),
            cold_start_trials: DEFAULT_COLD_START_TRIALS,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a bandit with a fixed seed (for reproducibility in tests)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Set the number of trials spent in cold start
    pub fn with_cold_start_trials(mut self, trials: u64) -> Self {
        self.cold_start_trials = trials;
        self
    }

    /// Trials required before a key leaves cold start
    pub fn cold_start_trials(&self) -> u64 {
        self.cold_start_trials
    }

    /// Whether a posterior already exists for this (key, arm) pair
    pub fn has_arm(&self, key: &RoutingKey, arm: &str) -> bool {
        self.posteriors
            .get(&key.to_string())
            .is_some_and(|arms| arms.contains_key(arm))
    }

    /// Insert a posterior for an arm if none exists yet
    ///
    /// `prior` seeds (alpha, beta); `None` means the uniform Beta(1,1).
    pub fn ensure_arm(&mut self, key: &RoutingKey, arm: &str, prior: Option<(f64, f64)>) {
        self.posteriors
            .entry(key.to_string())
            .or_default()
            .entry(arm.to_string())
            .or_insert_with(|| match prior {
                Some((alpha, beta)) => Posterior::from_prior(alpha, beta),
                None => Posterior::new(),
            });
    }

    /// Get the posterior for a (key, arm) pair if it exists
    pub fn posterior(&self, key: &RoutingKey, arm: &str) -> Option<&Posterior> {
        self.posteriors
            .get(&key.to_string())
            .and_then(|arms| arms.get(arm))
    }

    /// Total trials observed across every arm of a key
    pub fn total_trials(&self, key: &RoutingKey) -> u64 {
        self.posteriors
            .get(&key.to_string())
            .map(|arms| arms.values().map(|p| p.trials).sum())
            .unwrap_or(0)
    }

    /// Current phase of a routing key
    pub fn phase(&self, key: &RoutingKey) -> Phase {
        if self.total_trials(key) >= self.cold_start_trials {
            Phase::SteadyState
        } else {
            Phase::ColdStart
        }
    }

    /// Select an arm among `candidates`
    ///
    /// Candidates without a posterior get a uniform one. Ties go to the
    /// first candidate in iteration order.
    pub fn select(
        &mut self,
        key: &RoutingKey,
        candidates: &[String],
        deterministic: bool,
    ) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(Error::InvalidArgument(
                "candidates must not be empty".to_string(),
            ));
        }

        for arm in candidates {
            self.ensure_arm(key, arm, None);
        }

        let phase = self.phase(key);
        if candidates.len() == 1 {
            return Ok(Selection {
                arm: candidates[0].clone(),
                phase,
                reason: RoutingReason::SingleCandidate,
            });
        }

        if phase == Phase::ColdStart {
            let index = self.rng.gen_range(0..candidates.len());
            return Ok(Selection {
                arm: candidates[index].clone(),
                phase,
                reason: RoutingReason::Exploration,
            });
        }

        let key_str = key.to_string();
        let arms = self.posteriors.get(&key_str);
        let mut best: Option<(&String, f64)> = None;

        for arm in candidates {
            let posterior = arms
                .and_then(|a| a.get(arm))
                .cloned()
                .unwrap_or_default();
            let score = if deterministic {
                posterior.mean()
            } else {
                posterior.sample(&mut self.rng)
            };

            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((arm, score));
            }
        }

        // candidates is non-empty, so best is always set
        let (arm, score) = best.ok_or_else(|| {
            Error::InvalidArgument("candidates must not be empty".to_string())
        })?;

        let reason = if deterministic {
            RoutingReason::Exploitation {
                expected_reward: score,
            }
        } else {
            RoutingReason::Sampled {
                sampled_value: score,
            }
        };

        Ok(Selection {
            arm: arm.clone(),
            phase,
            reason,
        })
    }

    /// Update the bandit with an observed reward
    ///
    /// Creates a uniform posterior for the arm if it doesn't exist yet and
    /// returns the posterior mean after the update.
    pub fn update(&mut self, key: &RoutingKey, arm: &str, reward: f64) -> f64 {
        let clamped_reward = reward.clamp(0.0, 1.0);

        let posterior = self
            .posteriors
            .entry(key.to_string())
            .or_default()
            .entry(arm.to_string())
            .or_default();

        posterior.update(clamped_reward);
        posterior.mean()
    }

    /// Get the expected values for all arms of a routing key
    pub fn expected_values(&self, key: &RoutingKey) -> BTreeMap<String, f64> {
        self.posteriors
            .get(&key.to_string())
            .map(|arms| {
                arms.iter()
                    .map(|(arm, p)| (arm.clone(), p.mean()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Summaries for every key, optionally restricted to one task type
    pub fn statistics(&self, task_filter: Option<&str>) -> RouterStatistics {
        self.posteriors
            .iter()
            .filter(|(key, _)| match task_filter {
                Some(task) => key
                    .parse::<RoutingKey>()
                    .is_ok_and(|key| key.matches_task(task)),
                None => true,
            })
            .map(|(key, arms)| {
                let arms = arms
                    .iter()
                    .map(|(arm, p)| (arm.clone(), ArmStatistics::from(p)))
                    .collect();
                (key.clone(), arms)
            })
            .collect()
    }

    /// Copy of all posteriors (for persistence)
    pub fn snapshot(&self) -> RouterSnapshot {
        self.posteriors.clone()
    }

    /// Replace all posteriors (e.g., from persistence)
    pub fn import_snapshot(&mut self, snapshot: RouterSnapshot) {
        self.posteriors = snapshot;
    }

    /// Number of routing keys with at least one posterior
    pub fn key_count(&self) -> usize {
        self.posteriors.len()
    }

    /// Reset all posteriors (useful for testing)
    pub fn reset(&mut self) {
        self.posteriors.clear();
    }
}
