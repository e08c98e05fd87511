//! Doubly-robust contextual bandit
//!
//! Each arm keeps a small online linear regression (the direct-method
//! reward model). Selection scores every candidate by its predicted reward
//! plus an exploration bonus that shrinks as the arm accumulates trials.
//!
//! Updates take an importance weight: the probability ratio between the
//! policy being learned and the policy that actually acted. The weight
//! scales the gradient step and feeds the doubly-robust value estimate
//!
//! ```text
//! dr = r̂(x) + w · (r − r̂(x))
//! ```
//!
//! which stays unbiased if either the regression or the weights are right.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::context::ContextVector;
use super::policy::{
    ArmSummary, ContextualPolicy, PolicyState, PolicyStatistics, require_candidates,
    require_finite_reward,
};
use crate::error::{Error, Result};

/// Importance weights kept per arm before the oldest are dropped
pub const MAX_WEIGHT_HISTORY: usize = 1000;

/// Configuration for the doubly-robust bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoublyRobustConfig {
    /// Exploration bonus scale
    pub alpha: f64,
    /// Number of context features used by the reward models
    pub dim: usize,
    /// Gradient step size
    pub learning_rate: f64,
    /// Upper bound applied to caller-supplied importance weights
    pub max_importance_weight: f64,
    /// Features pinned to the first model slots, in order
    ///
    /// Features not listed here take the remaining slots as they are first
    /// seen by an update. Once `dim` slots are taken, new features are ignored.
    pub features: Vec<String>,
}

impl Default for DoublyRobustConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            dim: 8,
            learning_rate: 0.1,
            max_importance_weight: 10.0,
            features: Vec::new(),
        }
    }
}

/// Online linear regression of reward on context for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl RewardModel {
    /// Zero-initialized model of the given dimension
    pub fn new(dim: usize) -> Self {
        Self {
            weights: vec![0.0; dim],
            bias: 0.0,
        }
    }

    /// Predicted reward for a dense feature vector
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(x)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }

    /// One normalized least-mean-squares step toward `target`
    ///
    /// The step is divided by `1 + |x|²` so large feature magnitudes can't
    /// make the update diverge.
    pub fn step(&mut self, x: &[f64], target: f64, learning_rate: f64, weight: f64) {
        let error = target - self.predict(x);
        let norm = 1.0 + x.iter().map(|v| v * v).sum::<f64>();
        let step = learning_rate * weight * error / norm;

        for (w, v) in self.weights.iter_mut().zip(x) {
            *w += step * v;
        }
        self.bias += step;
    }
}

/// Persisted form of [`DoublyRobustBandit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoublyRobustState {
    pub alpha: f64,
    pub dim: usize,
    pub learning_rate: f64,
    #[serde(default = "default_max_importance_weight")]
    pub max_importance_weight: f64,
    /// Feature name for each model slot
    #[serde(default)]
    pub features: Vec<String>,
    pub reward_models: BTreeMap<String, RewardModel>,
    pub counts: BTreeMap<String, u64>,
    pub q_values: BTreeMap<String, f64>,
    pub importance_weights: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub dr_values: BTreeMap<String, f64>,
}

fn default_max_importance_weight() -> f64 {
    DoublyRobustConfig::default().max_importance_weight
}

/// Contextual bandit with a direct reward model and importance-weighted correction
#[derive(Debug, Clone, PartialEq)]
pub struct DoublyRobustBandit {
    config: DoublyRobustConfig,
    features: Vec<String>,
    reward_models: BTreeMap<String, RewardModel>,
    counts: BTreeMap<String, u64>,
    q_values: BTreeMap<String, f64>,
    importance_weights: BTreeMap<String, Vec<f64>>,
    dr_values: BTreeMap<String, f64>,
}

impl DoublyRobustBandit {
    /// Create an untrained bandit
    pub fn new(config: DoublyRobustConfig) -> Self {
        let mut features: Vec<String> = Vec::new();
        for name in &config.features {
            if features.len() < config.dim && !features.contains(name) {
                features.push(name.clone());
            }
        }
        Self {
            config,
            features,
            reward_models: BTreeMap::new(),
            counts: BTreeMap::new(),
            q_values: BTreeMap::new(),
            importance_weights: BTreeMap::new(),
            dr_values: BTreeMap::new(),
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &DoublyRobustConfig {
        &self.config
    }

    /// Feature name assigned to each model slot
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Current reward-model prediction for an arm (0.0 for unseen arms)
    pub fn predict_reward(&self, arm: &str, context: &ContextVector) -> f64 {
        self.reward_models
            .get(arm)
            .map(|model| model.predict(&context.project(&self.features, self.config.dim)))
            .unwrap_or(0.0)
    }

    /// Give unseen features of `context` a slot while any are free
    fn assign_slots(&mut self, context: &ContextVector) {
        for name in context.feature_names() {
            if self.features.len() >= self.config.dim {
                break;
            }
            if !self.features.iter().any(|known| known == name) {
                self.features.push(name.to_string());
            }
        }
    }

    /// Exploration bonus; untried arms are always tried first
    fn exploration_bonus(&self, arm: &str, total: u64) -> f64 {
        match self.counts.get(arm).copied().unwrap_or(0) {
            0 => f64::INFINITY,
            n => self.config.alpha * ((total as f64 + 1.0).ln() / (n as f64 + 1.0)).sqrt(),
        }
    }

    /// Learn from a reward observed under a possibly different acting policy
    ///
    /// `weight` scales the regression step and the correction term; it is
    /// clamped into `[0, max_importance_weight]`.
    pub fn update_with_importance_weight(
        &mut self,
        arm: &str,
        reward: f64,
        context: &ContextVector,
        weight: f64,
    ) -> Result<()> {
        let reward = require_finite_reward(reward)?;
        if !weight.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "importance weight must be finite, got {}",
                weight
            )));
        }
        let weight = weight.clamp(0.0, self.config.max_importance_weight.max(0.0));

        let count = self.counts.entry(arm.to_string()).or_insert(0);
        *count += 1;
        let n = *count as f64;

        let q = self.q_values.entry(arm.to_string()).or_insert(0.0);
        *q += (reward - *q) / n;

        self.assign_slots(context);
        let x = context.project(&self.features, self.config.dim);
        let dim = self.config.dim;
        let model = self
            .reward_models
            .entry(arm.to_string())
            .or_insert_with(|| RewardModel::new(dim));
        let predicted = model.predict(&x);
        model.step(&x, reward, self.config.learning_rate, weight);

        let dr_estimate = predicted + weight * (reward - predicted);
        let dr = self.dr_values.entry(arm.to_string()).or_insert(0.0);
        *dr += (dr_estimate - *dr) / n;

        let weights = self.importance_weights.entry(arm.to_string()).or_default();
        weights.push(weight);
        if weights.len() > MAX_WEIGHT_HISTORY {
            let excess = weights.len() - MAX_WEIGHT_HISTORY;
            weights.drain(..excess);
        }

        Ok(())
    }

    /// Number of updates recorded for an arm
    pub fn count(&self, arm: &str) -> u64 {
        self.counts.get(arm).copied().unwrap_or(0)
    }

    /// Running doubly-robust value estimate for an arm
    pub fn dr_value(&self, arm: &str) -> Option<f64> {
        self.dr_values.get(arm).copied()
    }

    /// Recent importance weights recorded for an arm
    pub fn importance_weights(&self, arm: &str) -> &[f64] {
        self.importance_weights
            .get(arm)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl ContextualPolicy for DoublyRobustBandit {
    fn recommend(&mut self, context: &ContextVector, candidates: &[String]) -> Result<String> {
        require_candidates(candidates)?;
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }

        let total: u64 = self.counts.values().sum();
        let mut best: Option<(&String, f64)> = None;
        for arm in candidates {
            let score = self.predict_reward(arm, context) + self.exploration_bonus(arm, total);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((arm, score));
            }
        }

        Ok(best.map_or_else(|| candidates[0].clone(), |(arm, _)| arm.clone()))
    }

    fn update(&mut self, arm: &str, reward: f64, context: &ContextVector) -> Result<()> {
        self.update_with_importance_weight(arm, reward, context, 1.0)
    }

    fn statistics(&self) -> PolicyStatistics {
        self.counts
            .iter()
            .map(|(arm, count)| {
                let q_value = self.q_values.get(arm).copied().unwrap_or(0.0);
                (
                    arm.clone(),
                    ArmSummary {
                        count: *count,
                        q_value,
                    },
                )
            })
            .collect()
    }

    fn to_state(&self) -> PolicyState {
        PolicyState::DoublyRobust(DoublyRobustState {
            alpha: self.config.alpha,
            dim: self.config.dim,
            learning_rate: self.config.learning_rate,
            max_importance_weight: self.config.max_importance_weight,
            features: self.features.clone(),
            reward_models: self.reward_models.clone(),
            counts: self.counts.clone(),
            q_values: self.q_values.clone(),
            importance_weights: self.importance_weights.clone(),
            dr_values: self.dr_values.clone(),
        })
    }

    fn from_state(state: PolicyState) -> Result<Self> {
        let found = state.policy_name();
        let PolicyState::DoublyRobust(state) = state else {
            return Err(Error::StateCorruption(format!(
                "expected doubly_robust snapshot, found {}",
                found
            )));
        };

        if let Some((arm, _)) = state
            .reward_models
            .iter()
            .find(|(_, model)| model.weights.len() != state.dim)
        {
            return Err(Error::StateCorruption(format!(
                "reward model for {} does not match dim {}",
                arm, state.dim
            )));
        }

        if state.features.len() > state.dim {
            return Err(Error::StateCorruption(format!(
                "{} feature slots exceed dim {}",
                state.features.len(),
                state.dim
            )));
        }
        if let Some((i, name)) = state
            .features
            .iter()
            .enumerate()
            .find(|&(i, name)| state.features[..i].contains(name))
        {
            return Err(Error::StateCorruption(format!(
                "feature {} assigned twice (slot {})",
                name, i
            )));
        }

        Ok(Self {
            config: DoublyRobustConfig {
                alpha: state.alpha,
                dim: state.dim,
                learning_rate: state.learning_rate,
                max_importance_weight: state.max_importance_weight,
                features: state.features.clone(),
            },
            features: state.features,
            reward_models: state.reward_models,
            counts: state.counts,
            q_values: state.q_values,
            importance_weights: state.importance_weights,
            dr_values: state.dr_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn bandit() -> DoublyRobustBandit {
        DoublyRobustBandit::new(DoublyRobustConfig::default())
    }

    #[test]
    fn test_empty_candidates() {
        let err = bandit()
            .recommend(&ContextVector::new(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_single_candidate_short_circuit() {
        let mut bandit = bandit();
        let arm = bandit
            .recommend(&ContextVector::new(), &["only".to_string()])
            .unwrap();
        assert_eq!(arm, "only");
    }

    #[test]
    fn test_prediction_starts_at_zero_and_moves_toward_reward() {
        let mut bandit = bandit();
        let context = ContextVector::new().with("x", 0.5).with("y", 2.0);
        assert_eq!(bandit.predict_reward("a", &context), 0.0);

        let mut previous = 0.0;
        for _ in 0..100 {
            bandit.update("a", 1.0, &context).unwrap();
            let prediction = bandit.predict_reward("a", &context);
            assert!(prediction >= previous - 1e-12);
            previous = prediction;
        }
        assert!(previous > 0.95, "prediction was {}", previous);
    }

    #[test]
    fn test_untried_arm_is_explored_first() {
        let mut bandit = bandit();
        let context = ContextVector::new().with("x", 1.0);
        bandit.update("a", 1.0, &context).unwrap();

        assert_eq!(bandit.recommend(&context, &candidates()).unwrap(), "b");
    }

    #[test]
    fn test_learns_context_dependent_rewards() {
        let mut bandit = bandit();
        let positive = ContextVector::new().with("x", 1.0);
        let negative = ContextVector::new().with("x", -1.0);

        for _ in 0..300 {
            bandit.update("a", 1.0, &positive).unwrap();
            bandit.update("a", 0.0, &negative).unwrap();
            bandit.update("b", 0.0, &positive).unwrap();
            bandit.update("b", 1.0, &negative).unwrap();
        }

        assert!(bandit.predict_reward("a", &positive) > 0.9);
        assert!(bandit.predict_reward("b", &positive) < 0.1);
        assert_eq!(bandit.recommend(&positive, &candidates()).unwrap(), "a");
        assert_eq!(bandit.recommend(&negative, &candidates()).unwrap(), "b");
    }

    #[test]
    fn test_update_tracks_counts_and_q_values() {
        let mut bandit = bandit();
        let context = ContextVector::new();
        bandit.update("a", 1.0, &context).unwrap();
        bandit.update("a", 0.0, &context).unwrap();
        bandit.update("a", 5.0, &context).unwrap();

        let stats = bandit.statistics();
        assert_eq!(stats["a"].count, 3);
        assert!((stats["a"].q_value - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(bandit.importance_weights("a"), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_zero_importance_weight_leaves_model_unchanged() {
        let mut bandit = bandit();
        let context = ContextVector::new().with("x", 1.0);
        bandit
            .update_with_importance_weight("a", 1.0, &context, 0.0)
            .unwrap();

        assert_eq!(bandit.predict_reward("a", &context), 0.0);
        assert_eq!(bandit.count("a"), 1);
        assert_eq!(bandit.importance_weights("a"), &[0.0]);
        assert_eq!(bandit.dr_value("a"), Some(0.0));
    }

    #[test]
    fn test_larger_importance_weight_takes_larger_step() {
        let context = ContextVector::new().with("x", 1.0);
        let mut light = bandit();
        let mut heavy = bandit();
        light
            .update_with_importance_weight("a", 1.0, &context, 1.0)
            .unwrap();
        heavy
            .update_with_importance_weight("a", 1.0, &context, 3.0)
            .unwrap();

        assert!(heavy.predict_reward("a", &context) > light.predict_reward("a", &context));
        assert_eq!(heavy.dr_value("a"), Some(3.0));
    }

    #[test]
    fn test_importance_weight_is_clamped() {
        let mut bandit = bandit();
        let context = ContextVector::new();
        bandit
            .update_with_importance_weight("a", 1.0, &context, 1e9)
            .unwrap();
        bandit
            .update_with_importance_weight("a", 1.0, &context, -4.0)
            .unwrap();
        assert_eq!(bandit.importance_weights("a"), &[10.0, 0.0]);

        let err = bandit
            .update_with_importance_weight("a", 1.0, &context, f64::NAN)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_weight_history_is_bounded() {
        let mut bandit = bandit();
        let context = ContextVector::new();
        for _ in 0..(MAX_WEIGHT_HISTORY + 50) {
            bandit.update("a", 0.5, &context).unwrap();
        }
        assert_eq!(bandit.importance_weights("a").len(), MAX_WEIGHT_HISTORY);
    }

    #[test]
    fn test_absent_feature_reads_as_zero() {
        let mut bandit = bandit();
        let trained = ContextVector::new().with("a", 1.0);
        for _ in 0..200 {
            bandit.update("arm", 1.0, &trained).unwrap();
        }

        let sparse = ContextVector::new().with("b", 1.0);
        let explicit = ContextVector::new().with("a", 0.0).with("b", 1.0);
        assert_eq!(
            bandit.predict_reward("arm", &sparse),
            bandit.predict_reward("arm", &explicit)
        );
        assert!(bandit.predict_reward("arm", &sparse) < bandit.predict_reward("arm", &trained));
    }

    #[test]
    fn test_feature_slots_are_stable() {
        let config = DoublyRobustConfig {
            dim: 2,
            features: vec!["priority".to_string()],
            ..DoublyRobustConfig::default()
        };
        let mut bandit = DoublyRobustBandit::new(config);
        assert_eq!(bandit.features(), &["priority".to_string()]);

        let context = ContextVector::new()
            .with("latency", 1.0)
            .with("length", 2.0)
            .with("priority", 3.0);
        bandit.update("a", 1.0, &context).unwrap();
        bandit.update("a", 1.0, &ContextVector::new().with("cost", 1.0)).unwrap();

        assert_eq!(
            bandit.features(),
            &["priority".to_string(), "latency".to_string()]
        );
    }

    #[test]
    fn test_state_round_trip() {
        let mut bandit = bandit();
        let context = ContextVector::new().with("x", 0.3).with("y", -1.2);
        bandit.update("a", 0.8, &context).unwrap();
        bandit
            .update_with_importance_weight("b", 0.1, &context, 2.5)
            .unwrap();

        let restored = DoublyRobustBandit::from_state(bandit.to_state()).unwrap();
        assert_eq!(restored.features(), bandit.features());
        assert_eq!(restored.to_state(), bandit.to_state());
        assert_eq!(
            restored.predict_reward("a", &context),
            bandit.predict_reward("a", &context)
        );

        let json = serde_json::to_string(&bandit.to_state()).unwrap();
        let parsed: PolicyState = serde_json::from_str(&json).unwrap();
        let reparsed = DoublyRobustBandit::from_state(parsed).unwrap();
        assert_eq!(reparsed.to_state(), bandit.to_state());
    }

    #[test]
    fn test_from_state_rejects_duplicate_feature_slots() {
        let mut bandit = bandit();
        bandit
            .update("a", 1.0, &ContextVector::new().with("x", 1.0))
            .unwrap();
        let PolicyState::DoublyRobust(mut state) = bandit.to_state() else {
            unreachable!()
        };
        state.features = vec!["x".to_string(), "x".to_string()];

        let err = DoublyRobustBandit::from_state(PolicyState::DoublyRobust(state)).unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }

    #[test]
    fn test_from_state_rejects_dimension_mismatch() {
        let mut bandit = bandit();
        bandit.update("a", 1.0, &ContextVector::new()).unwrap();
        let PolicyState::DoublyRobust(mut state) = bandit.to_state() else {
            unreachable!()
        };
        state.dim = 3;

        let err = DoublyRobustBandit::from_state(PolicyState::DoublyRobust(state)).unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }
}
