//! Cold-start priors for arms without local history
//!
//! When a routing key meets an arm for the first time, its posterior can be
//! seeded from outside evidence instead of Beta(1,1). Evidence is consulted
//! strictly in priority order:
//!
//! 1. **Benchmark** - static reference data shipped with the deployment
//! 2. **Cross-tenant** - aggregates other tenants published to the shared
//!    store under `bandit:cross_tenant:<arm>`
//! 3. **Uniform** - no evidence, confidence zero
//!
//! Store lookups are bounded by a short timeout and any failure degrades to
//! the uniform prior; a decision never waits on the shared store for long.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::shared_store::SharedStore;
use crate::error::{Error, Result};

/// Key prefix for cross-tenant aggregates in the shared store
pub const CROSS_TENANT_KEY_PREFIX: &str = "bandit:cross_tenant:";

/// Confidence assigned to benchmark entries that don't carry their own
pub const DEFAULT_BENCHMARK_CONFIDENCE: f64 = 0.8;

/// Sample count at which a cross-tenant aggregate reaches confidence 0.5
const CONFIDENCE_HALF_SAMPLES: f64 = 50.0;

/// Shared store key for an arm's aggregate
pub fn cross_tenant_key(arm: &str) -> String {
    format!("{}{}", CROSS_TENANT_KEY_PREFIX, arm)
}

/// Configuration for the prior service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Global scale on prior informativeness (0 = always uniform)
    pub prior_confidence: f64,
    /// Minimum samples for a cross-tenant aggregate to be trusted
    pub min_cross_tenant_samples: u64,
    /// Expiry for published aggregates
    pub cross_tenant_ttl_seconds: u64,
    /// How long successful lookups stay in the in-process cache
    pub cache_ttl_seconds: u64,
    /// Timeout for each shared store call
    pub store_timeout_ms: u64,
    /// Pseudo-count (alpha + beta - 2) of a fully confident prior
    pub max_prior_strength: f64,
    /// SQLite database backing the shared store
    pub store_path: Option<PathBuf>,
    /// JSON file with benchmark entries keyed by arm
    pub benchmarks_path: Option<PathBuf>,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            prior_confidence: 0.5,
            min_cross_tenant_samples: 10,
            cross_tenant_ttl_seconds: 7 * 24 * 3600,
            cache_ttl_seconds: 300,
            store_timeout_ms: 250,
            max_prior_strength: 50.0,
            store_path: None,
            benchmarks_path: None,
        }
    }
}

/// Where a prior came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorSource {
    Benchmark,
    CrossTenant,
    Uniform,
}

impl std::fmt::Display for PriorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Benchmark => write!(f, "benchmark"),
            Self::CrossTenant => write!(f, "cross_tenant"),
            Self::Uniform => write!(f, "uniform"),
        }
    }
}

/// Prior belief about an arm's reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrior {
    pub source: PriorSource,
    pub mean_reward: f64,
    pub variance: f64,
    pub sample_count: u64,
    /// How much the prior should be trusted, in `[0, 1]`
    pub confidence: f64,
}

impl ModelPrior {
    /// The uninformative prior
    pub fn uniform() -> Self {
        Self {
            source: PriorSource::Uniform,
            mean_reward: 0.5,
            variance: 1.0 / 12.0,
            sample_count: 0,
            confidence: 0.0,
        }
    }
}

/// Aggregate outcome statistics for one arm, pooled across tenants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTenantAggregate {
    pub mean_reward: f64,
    pub variance: f64,
    pub sample_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// One benchmark entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub mean_reward: f64,
    #[serde(default)]
    pub variance: f64,
    #[serde(default)]
    pub sample_count: u64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl BenchmarkEntry {
    /// Create an entry with the default confidence
    pub fn new(mean_reward: f64) -> Self {
        Self {
            mean_reward,
            variance: 0.0,
            sample_count: 0,
            confidence: None,
        }
    }
}

/// Static benchmark reference data keyed by arm
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BenchmarkTable {
    entries: HashMap<String, BenchmarkEntry>,
}

impl BenchmarkTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table from a JSON object `{ "<arm>": { "mean_reward": ... } }`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&contents)?;
        info!(path = %path.display(), entries = table.len(), "Loaded benchmark priors");
        Ok(table)
    }

    /// Add or replace an entry
    pub fn insert(&mut self, arm: impl Into<String>, entry: BenchmarkEntry) {
        self.entries.insert(arm.into(), entry);
    }

    /// Get the entry for an arm
    pub fn get(&self, arm: &str) -> Option<&BenchmarkEntry> {
        self.entries.get(arm)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Produces informative priors for arms with no local observations
pub struct ColdStartPriorService {
    config: PriorConfig,
    benchmarks: BenchmarkTable,
    store: Option<Arc<dyn SharedStore>>,
    cache: RwLock<HashMap<String, (CrossTenantAggregate, Instant)>>,
}

impl ColdStartPriorService {
    /// Create a service with no benchmarks and no shared store
    pub fn new(config: PriorConfig) -> Self {
        Self {
            config,
            benchmarks: BenchmarkTable::new(),
            store: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Set the benchmark table
    pub fn with_benchmarks(mut self, benchmarks: BenchmarkTable) -> Self {
        self.benchmarks = benchmarks;
        self
    }

    /// Set the shared store for cross-tenant aggregates
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &PriorConfig {
        &self.config
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }

    /// Resolve the best available prior for an arm
    pub async fn get_model_prior(&self, arm: &str, tenant: &str) -> ModelPrior {
        if let Some(entry) = self.benchmarks.get(arm) {
            debug!(arm = %arm, tenant = %tenant, "Using benchmark prior");
            return ModelPrior {
                source: PriorSource::Benchmark,
                mean_reward: entry.mean_reward.clamp(0.0, 1.0),
                variance: entry.variance,
                sample_count: entry.sample_count,
                confidence: entry
                    .confidence
                    .unwrap_or(DEFAULT_BENCHMARK_CONFIDENCE)
                    .clamp(0.0, 1.0),
            };
        }

        match self.cross_tenant_aggregate(arm).await {
            Ok(Some(aggregate)) => {
                debug!(
                    arm = %arm,
                    tenant = %tenant,
                    sample_count = aggregate.sample_count,
                    "Using cross-tenant prior"
                );
                let n = aggregate.sample_count as f64;
                ModelPrior {
                    source: PriorSource::CrossTenant,
                    mean_reward: aggregate.mean_reward,
                    variance: aggregate.variance,
                    sample_count: aggregate.sample_count,
                    confidence: n / (n + CONFIDENCE_HALF_SAMPLES),
                }
            }
            Ok(None) => ModelPrior::uniform(),
            Err(e) => {
                debug!(arm = %arm, tenant = %tenant, error = %e, "Cross-tenant prior unavailable");
                ModelPrior::uniform()
            }
        }
    }

    /// Beta parameters for a new arm's posterior
    ///
    /// The mean `alpha / (alpha + beta)` tracks the prior's mean reward and
    /// the pseudo-count grows with both the configured `prior_confidence`
    /// and the prior's own confidence.
    pub async fn get_prior_for_model(&self, arm: &str, tenant: &str) -> (f64, f64) {
        let prior = self.get_model_prior(arm, tenant).await;
        self.beta_parameters(&prior)
    }

    /// Convert a prior into Beta parameters
    pub fn beta_parameters(&self, prior: &ModelPrior) -> (f64, f64) {
        let strength = self.config.max_prior_strength.max(0.0)
            * self.config.prior_confidence.clamp(0.0, 1.0)
            * prior.confidence.clamp(0.0, 1.0);
        let mean = prior.mean_reward.clamp(0.0, 1.0);
        (1.0 + mean * strength, 1.0 + (1.0 - mean) * strength)
    }

    /// Look up a trusted aggregate, consulting the in-process cache first
    ///
    /// `Ok(None)` means no trusted aggregate exists; errors mean the store
    /// could not be consulted or returned malformed data.
    pub async fn cross_tenant_aggregate(&self, arm: &str) -> Result<Option<CrossTenantAggregate>> {
        let cache_ttl = Duration::from_secs(self.config.cache_ttl_seconds);
        {
            let cache = self.cache.read().await;
            if let Some((aggregate, fetched_at)) = cache.get(arm) {
                if fetched_at.elapsed() < cache_ttl {
                    return Ok(Some(aggregate.clone()));
                }
            }
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };

        let key = cross_tenant_key(arm);
        let raw = tokio::time::timeout(self.store_timeout(), store.get(&key))
            .await
            .map_err(|_| {
                Error::DependencyUnavailable(format!("shared store timed out reading {}", key))
            })??;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let aggregate: CrossTenantAggregate = serde_json::from_str(&raw).map_err(|e| {
            Error::DependencyUnavailable(format!("malformed aggregate under {}: {}", key, e))
        })?;

        if !aggregate.mean_reward.is_finite() || !aggregate.variance.is_finite() {
            return Err(Error::DependencyUnavailable(format!(
                "non-finite aggregate under {}",
                key
            )));
        }

        if aggregate.sample_count < self.config.min_cross_tenant_samples {
            debug!(
                arm = %arm,
                sample_count = aggregate.sample_count,
                min = self.config.min_cross_tenant_samples,
                "Cross-tenant aggregate below sample threshold"
            );
            return Ok(None);
        }

        let aggregate = CrossTenantAggregate {
            mean_reward: aggregate.mean_reward.clamp(0.0, 1.0),
            ..aggregate
        };

        self.cache
            .write()
            .await
            .insert(arm.to_string(), (aggregate.clone(), Instant::now()));

        Ok(Some(aggregate))
    }

    /// Publish an aggregate for an arm, overwriting any previous value
    ///
    /// Returns `false` when there is no store or the write fails.
    pub async fn store_cross_tenant_aggregate(
        &self,
        arm: &str,
        mean_reward: f64,
        variance: f64,
        sample_count: u64,
        ttl: Option<Duration>,
    ) -> bool {
        let Some(store) = &self.store else {
            debug!(arm = %arm, "No shared store configured, aggregate not stored");
            return false;
        };

        let aggregate = CrossTenantAggregate {
            mean_reward,
            variance,
            sample_count,
            updated_at: Utc::now(),
        };

        let payload = match serde_json::to_string(&aggregate) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(arm = %arm, error = %e, "Failed to serialize aggregate");
                return false;
            }
        };

        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.cross_tenant_ttl_seconds));
        let key = cross_tenant_key(arm);

        match tokio::time::timeout(self.store_timeout(), store.set_with_ttl(&key, &payload, ttl))
            .await
        {
            Ok(Ok(())) => {
                self.cache.write().await.remove(arm);
                info!(arm = %arm, sample_count = sample_count, "Stored cross-tenant aggregate");
                true
            }
            Ok(Err(e)) => {
                debug!(arm = %arm, error = %e, "Failed to store cross-tenant aggregate");
                false
            }
            Err(_) => {
                debug!(arm = %arm, "Timed out storing cross-tenant aggregate");
                false
            }
        }
    }

    /// Drop every cached lookup
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}
