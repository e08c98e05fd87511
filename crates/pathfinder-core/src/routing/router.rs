//! Model Router - Thompson Sampling routing service
//!
//! This module provides the main ModelRouter that combines:
//! - Thompson Sampling bandit with per-(tenant, task) posteriors
//! - Optional cold-start priors for arms a key has never seen
//! - Periodic snapshot persistence off the decision path
//!
//! The router is an explicitly constructed service: build one per process
//! and share it by reference (or `Arc`) with every caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::bandit::{DEFAULT_COLD_START_TRIALS, RouterSnapshot, ThompsonSamplingBandit};
use super::observer::{RoutingObserver, TracingObserver};
use super::priors::ColdStartPriorService;
use super::snapshot::SnapshotFile;
use super::types::{Phase, RouterStatistics, RoutingDecision, RoutingKey, RoutingReason};
use crate::error::{Error, Result};

/// Configuration for the model router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// When false, every decision returns the first candidate
    pub enabled: bool,
    /// Rewards a routing key must see before leaving cold start
    pub cold_start_trials: u64,
    /// Persist the snapshot every N reward updates
    pub persist_every: u64,
    /// Snapshot location; `None` keeps state in memory only
    pub state_path: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cold_start_trials: DEFAULT_COLD_START_TRIALS,
            persist_every: 10,
            state_path: None,
        }
    }
}

/// Thompson Sampling router shared by concurrent callers
pub struct ModelRouter {
    /// Configuration
    config: RouterConfig,
    /// Thompson Sampling bandit
    bandit: RwLock<ThompsonSamplingBandit>,
    /// Optional snapshot persistence
    snapshot: Option<SnapshotFile>,
    /// Optional prior service for seeding new arms
    priors: Option<Arc<ColdStartPriorService>>,
    /// Metrics sink
    observer: Arc<dyn RoutingObserver>,
    /// Reward updates since construction
    updates: AtomicU64,
    /// Serializes snapshot writes so an older state never lands last
    save_lock: Mutex<()>,
}

impl ModelRouter {
    /// Create a new router with default configuration
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration
    ///
    /// If `state_path` is set the snapshot is loaded immediately; a missing
    /// or corrupt snapshot yields an empty router.
    pub fn with_config(config: RouterConfig) -> Self {
        ModelRouterBuilder::new().config(config).build()
    }

    /// Start building a router
    pub fn builder() -> ModelRouterBuilder {
        ModelRouterBuilder::new()
    }

    /// Get the current configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Scoped handle that routes on behalf of one tenant
    pub fn for_tenant(&self, tenant: impl Into<String>) -> TenantRouter<'_> {
        TenantRouter {
            router: self,
            tenant: tenant.into(),
        }
    }

    /// Select an arm for a task under the default tenant
    pub async fn select_arm(
        &self,
        task: &str,
        candidates: &[String],
        deterministic: bool,
    ) -> Result<RoutingDecision> {
        self.select(&RoutingKey::new(None, task), candidates, deterministic)
            .await
    }

    /// Record a reward for a task under the default tenant
    pub async fn update_reward(&self, task: &str, arm: &str, reward: f64) -> Result<bool> {
        self.record(&RoutingKey::new(None, task), arm, reward).await
    }

    /// Select an arm for a routing key
    ///
    /// Fails with `InvalidArgument` when `candidates` is empty. Never fails
    /// otherwise: prior lookups that error degrade to the uniform prior.
    pub async fn select(
        &self,
        key: &RoutingKey,
        candidates: &[String],
        deterministic: bool,
    ) -> Result<RoutingDecision> {
        if candidates.is_empty() {
            return Err(Error::InvalidArgument(
                "candidates must not be empty".to_string(),
            ));
        }

        if !self.config.enabled {
            let phase = self.bandit.read().await.phase(key);
            let arm = candidates[0].clone();
            self.observer.on_selection(&key.task, &arm, phase);
            return Ok(RoutingDecision::new(key.clone(), arm, phase, RoutingReason::Disabled));
        }

        self.seed_new_arms(key, candidates).await;

        let selection = {
            let mut bandit = self.bandit.write().await;
            bandit.select(key, candidates, deterministic)?
        };

        let alternatives: Vec<String> = candidates
            .iter()
            .filter(|c| **c != selection.arm)
            .cloned()
            .collect();

        debug!(
            routing_key = %key,
            arm = %selection.arm,
            phase = %selection.phase,
            deterministic = deterministic,
            "Selected arm"
        );
        self.observer
            .on_selection(&key.task, &selection.arm, selection.phase);

        Ok(
            RoutingDecision::new(key.clone(), selection.arm, selection.phase, selection.reason)
                .with_alternatives(alternatives),
        )
    }

    /// Record an observed reward for an arm
    ///
    /// The reward is clamped into `[0, 1]`. Every `persist_every` updates the
    /// snapshot is written; the return value is `false` only when such a
    /// write was due and failed. In-memory state is never rolled back.
    pub async fn record(&self, key: &RoutingKey, arm: &str, reward: f64) -> Result<bool> {
        if !reward.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "reward must be finite, got {}",
                reward
            )));
        }
        let clamped_reward = reward.clamp(0.0, 1.0);

        let arms = [arm.to_string()];
        self.seed_new_arms(key, &arms).await;

        let posterior_mean = {
            let mut bandit = self.bandit.write().await;
            bandit.update(key, arm, clamped_reward)
        };

        debug!(
            routing_key = %key,
            arm = %arm,
            reward = clamped_reward,
            posterior_mean = posterior_mean,
            "Recorded reward"
        );
        self.observer
            .on_reward(&key.task, arm, clamped_reward, posterior_mean);

        let count = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        let persist_every = self.config.persist_every.max(1);
        if self.snapshot.is_some() && count % persist_every == 0 {
            if let Err(e) = self.save().await {
                warn!(error = %e, "Failed to persist routing snapshot");
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Seed posteriors for arms this key has never seen, using the prior service
    async fn seed_new_arms(&self, key: &RoutingKey, arms: &[String]) {
        let Some(priors) = &self.priors else {
            return;
        };

        let missing: Vec<String> = {
            let bandit = self.bandit.read().await;
            arms.iter()
                .filter(|arm| !bandit.has_arm(key, arm))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return;
        }

        let mut seeded = Vec::with_capacity(missing.len());
        for arm in missing {
            let prior = priors.get_prior_for_model(&arm, &key.tenant).await;
            seeded.push((arm, prior));
        }

        let mut bandit = self.bandit.write().await;
        for (arm, prior) in seeded {
            bandit.ensure_arm(key, &arm, Some(prior));
        }
    }

    /// Persist the full snapshot now (e.g., at graceful shutdown)
    ///
    /// The snapshot is cloned under the read lock; serialization and the
    /// file write happen after the lock is released.
    pub async fn save(&self) -> Result<()> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;
        let snapshot = self.bandit.read().await.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        file.save_bytes_async(json).await?;

        info!(
            path = %file.path().display(),
            routing_keys = snapshot.len(),
            "Saved routing snapshot"
        );
        Ok(())
    }

    /// Statistics for every routing key, optionally filtered by task
    pub async fn get_statistics(&self, task_filter: Option<&str>) -> RouterStatistics {
        self.bandit.read().await.statistics(task_filter)
    }

    /// Current phase of a routing key
    pub async fn phase(&self, key: &RoutingKey) -> Phase {
        self.bandit.read().await.phase(key)
    }

    /// Posterior means for every arm of a routing key
    pub async fn get_expected_values(
        &self,
        key: &RoutingKey,
    ) -> std::collections::BTreeMap<String, f64> {
        self.bandit.read().await.expected_values(key)
    }

    /// Copy of the full posterior state
    pub async fn to_state(&self) -> RouterSnapshot {
        self.bandit.read().await.snapshot()
    }

    /// Replace the full posterior state
    pub async fn load_state(&self, state: RouterSnapshot) {
        self.bandit.write().await.import_snapshot(state);
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router handle bound to one tenant
pub struct TenantRouter<'a> {
    router: &'a ModelRouter,
    tenant: String,
}

impl TenantRouter<'_> {
    fn key(&self, task: &str) -> RoutingKey {
        RoutingKey::new(Some(&self.tenant), task)
    }

    /// Select an arm for a task under this tenant
    pub async fn select_arm(
        &self,
        task: &str,
        candidates: &[String],
        deterministic: bool,
    ) -> Result<RoutingDecision> {
        self.router
            .select(&self.key(task), candidates, deterministic)
            .await
    }

    /// Record a reward for a task under this tenant
    pub async fn update_reward(&self, task: &str, arm: &str, reward: f64) -> Result<bool> {
        self.router.record(&self.key(task), arm, reward).await
    }

    /// Current phase of a task under this tenant
    pub async fn phase(&self, task: &str) -> Phase {
        self.router.phase(&self.key(task)).await
    }
}

/// Builder for ModelRouter
pub struct ModelRouterBuilder {
    config: RouterConfig,
    priors: Option<Arc<ColdStartPriorService>>,
    observer: Option<Arc<dyn RoutingObserver>>,
    seed: Option<u64>,
}

impl Default for ModelRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            priors: None,
            observer: None,
            seed: None,
        }
    }

    /// Set configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the snapshot location
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_path = Some(path.into());
        self
    }

    /// Set the cold-start trial budget
    pub fn cold_start_trials(mut self, trials: u64) -> Self {
        self.config.cold_start_trials = trials;
        self
    }

    /// Set the prior service used to seed new arms
    pub fn priors(mut self, priors: Arc<ColdStartPriorService>) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Set the metrics observer
    pub fn observer(mut self, observer: Arc<dyn RoutingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Fix the RNG seed (for reproducibility in tests)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the router, loading any existing snapshot
    pub fn build(self) -> ModelRouter {
        let mut bandit = match self.seed {
            Some(seed) => ThompsonSamplingBandit::with_seed(seed),
            None => ThompsonSamplingBandit::new(),
        }
        .with_cold_start_trials(self.config.cold_start_trials);

        let snapshot = self.config.state_path.clone().map(SnapshotFile::new);
        if let Some(file) = &snapshot {
            let state: RouterSnapshot = file.load_or_default();
            bandit.import_snapshot(state);
        }

        ModelRouter {
            config: self.config,
            bandit: RwLock::new(bandit),
            snapshot,
            priors: self.priors,
            observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
            updates: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::priors::{BenchmarkEntry, BenchmarkTable, PriorConfig};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn candidates() -> Vec<String> {
        vec!["model-a".to_string(), "model-b".to_string()]
    }

    #[derive(Default)]
    struct RecordingObserver {
        selections: StdMutex<Vec<(String, String, Phase)>>,
        rewards: StdMutex<Vec<(String, f64)>>,
    }

    impl RoutingObserver for RecordingObserver {
        fn on_selection(&self, task: &str, arm: &str, phase: Phase) {
            self.selections
                .lock()
                .unwrap()
                .push((task.to_string(), arm.to_string(), phase));
        }

        fn on_reward(&self, _task: &str, arm: &str, reward: f64, _posterior_mean: f64) {
            self.rewards.lock().unwrap().push((arm.to_string(), reward));
        }
    }

    #[tokio::test]
    async fn test_select_empty_candidates() {
        let router = ModelRouter::new();
        let err = router.select_arm("summarize", &[], false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_disabled_router_returns_first_candidate() {
        let router = ModelRouter::with_config(RouterConfig {
            enabled: false,
            ..Default::default()
        });

        for _ in 0..10 {
            let decision = router.select_arm("t", &candidates(), false).await.unwrap();
            assert_eq!(decision.arm, "model-a");
            assert_eq!(decision.reason, RoutingReason::Disabled);
        }
    }

    #[tokio::test]
    async fn test_default_tenant_resolution() {
        let router = ModelRouter::new();
        let decision = router.select_arm("summarize", &candidates(), false).await.unwrap();
        assert_eq!(decision.routing_key.tenant, "default");

        let stats = router.get_statistics(None).await;
        assert!(stats.contains_key("default:summarize"));
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let router = ModelRouterBuilder::new().seed(1).cold_start_trials(2).build();
        let acme = router.for_tenant("acme");
        let globex = router.for_tenant("globex");

        for _ in 0..5 {
            acme.update_reward("t", "model-a", 1.0).await.unwrap();
        }

        assert_eq!(acme.phase("t").await, Phase::SteadyState);
        assert_eq!(globex.phase("t").await, Phase::ColdStart);
    }

    #[tokio::test]
    async fn test_router_learning() {
        let router = ModelRouterBuilder::new().seed(7).cold_start_trials(5).build();

        for _ in 0..20 {
            router.update_reward("t", "model-a", 1.0).await.unwrap();
            router.update_reward("t", "model-b", 0.0).await.unwrap();
        }

        let decision = router.select_arm("t", &candidates(), true).await.unwrap();
        assert_eq!(decision.arm, "model-a");
        assert_eq!(decision.phase, Phase::SteadyState);
        assert_eq!(decision.alternatives, vec!["model-b".to_string()]);
    }

    #[tokio::test]
    async fn test_non_finite_reward_rejected() {
        let router = ModelRouter::new();
        let err = router
            .update_reward("t", "model-a", f64::NAN)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(router.get_statistics(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_priors_seed_new_arms() {
        let mut benchmarks = BenchmarkTable::new();
        benchmarks.insert("model-a", BenchmarkEntry::new(0.9));
        let priors = Arc::new(
            ColdStartPriorService::new(PriorConfig {
                prior_confidence: 1.0,
                ..Default::default()
            })
            .with_benchmarks(benchmarks),
        );
        let router = ModelRouterBuilder::new().priors(priors).build();

        router.select_arm("t", &candidates(), false).await.unwrap();

        let stats = router.get_statistics(Some("t")).await;
        let arms = &stats["default:t"];
        assert!(arms["model-a"].mean > 0.8);
        assert_eq!(arms["model-a"].trials, 0);
        assert_eq!((arms["model-b"].alpha, arms["model-b"].beta), (1.0, 1.0));
    }

    #[tokio::test]
    async fn test_observer_receives_events() {
        let observer = Arc::new(RecordingObserver::default());
        let router = ModelRouterBuilder::new()
            .observer(observer.clone())
            .build();

        let decision = router.select_arm("t", &candidates(), false).await.unwrap();
        router.update_reward("t", &decision.arm, 7.0).await.unwrap();

        let selections = observer.selections.lock().unwrap();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].2, Phase::ColdStart);
        assert_eq!(observer.rewards.lock().unwrap()[0].1, 1.0);
    }

    #[tokio::test]
    async fn test_periodic_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.json");
        let router = ModelRouter::with_config(RouterConfig {
            persist_every: 3,
            state_path: Some(path.clone()),
            ..Default::default()
        });

        router.update_reward("t", "model-a", 1.0).await.unwrap();
        router.update_reward("t", "model-a", 1.0).await.unwrap();
        assert!(!path.exists());

        assert!(router.update_reward("t", "model-a", 1.0).await.unwrap());
        assert!(path.exists());

        let reloaded = ModelRouter::with_config(RouterConfig {
            state_path: Some(path),
            ..Default::default()
        });
        let stats = reloaded.get_statistics(None).await;
        assert_eq!(stats["default:t"]["model-a"].trials, 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_reports_false() {
        let dir = tempdir().unwrap();
        // A directory where the snapshot file should be makes the rename fail
        let path = dir.path().join("router.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let router = ModelRouter::with_config(RouterConfig {
            persist_every: 1,
            state_path: Some(path),
            ..Default::default()
        });

        assert!(!router.update_reward("t", "model-a", 1.0).await.unwrap());
        let stats = router.get_statistics(None).await;
        assert_eq!(stats["default:t"]["model-a"].trials, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_invariant() {
        let router = Arc::new(ModelRouterBuilder::new().seed(11).build());
        let mut handles = Vec::new();

        for i in 0..8 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    let reward = ((i + j) % 3) as f64 / 2.0;
                    router.update_reward("t", "model-a", reward).await.unwrap();
                    router.select_arm("t", &candidates(), false).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = router.get_statistics(None).await;
        let arm = &stats["default:t"]["model-a"];
        assert_eq!(arm.trials, 200);
        assert!((arm.alpha + arm.beta - (2.0 + arm.trials as f64)).abs() < 1e-6);
    }
}
