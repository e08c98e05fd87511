//! Adaptive model routing
//!
//! This module decides which arm (usually a model) should serve a request
//! and learns from the rewards reported afterwards. The key components are:
//!
//! - **Thompson Sampling Router**: one Beta-Bernoulli posterior per
//!   `(tenant, task, arm)`. New routing keys explore uniformly for
//!   `cold_start_trials` rewards, then sample from the posteriors.
//!
//! - **Cold-Start Priors**: new arms are seeded from a benchmark table or a
//!   cross-tenant aggregate published in a shared store, falling back to a
//!   uniform prior whenever either source is missing or unreachable.
//!
//! - **Contextual Bandits**: a doubly-robust linear bandit and an offset-tree
//!   bandit choose arms from a feature vector instead of a routing key.
//!
//! - **Snapshots**: router and policy state are persisted as JSON with
//!   atomic writes; a missing or corrupt snapshot starts empty.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pathfinder_core::routing::{ModelRouter, RouterConfig};
//!
//! let router = ModelRouter::builder()
//!     .state_path("/var/lib/pathfinder/router.json")
//!     .build();
//!
//! let candidates = vec!["small".to_string(), "large".to_string()];
//! let decision = router
//!     .for_tenant("acme")
//!     .select_arm("summarize", &candidates, false)
//!     .await?;
//!
//! // ... serve the request with decision.arm ...
//!
//! router
//!     .for_tenant("acme")
//!     .update_reward("summarize", &decision.arm, 0.9)
//!     .await?;
//! ```

mod bandit;
mod context;
mod doubly_robust;
mod observer;
mod offset_tree;
mod policy;
mod posterior;
mod priors;
mod router;
mod shared_store;
mod snapshot;
mod types;

pub use bandit::{DEFAULT_COLD_START_TRIALS, RouterSnapshot, Selection, ThompsonSamplingBandit};
pub use context::{ContextVector, MISSING_FEATURE_VALUE};
pub use doubly_robust::{
    DoublyRobustBandit, DoublyRobustConfig, DoublyRobustState, MAX_WEIGHT_HISTORY, RewardModel,
};
pub use observer::{RoutingObserver, TracingObserver};
pub use offset_tree::{
    LocalArmStats, MAX_CONTEXT_HISTORY, NodeChildren, OffsetTreeBandit, OffsetTreeConfig,
    OffsetTreeState, ROOT_NODE_ID, TRIMMED_CONTEXT_HISTORY, TreeNode,
};
pub use policy::{ArmSummary, ContextualPolicy, PolicyState, PolicyStatistics, SharedPolicy};
pub use posterior::Posterior;
pub use priors::{
    BenchmarkEntry, BenchmarkTable, CROSS_TENANT_KEY_PREFIX, ColdStartPriorService,
    CrossTenantAggregate, DEFAULT_BENCHMARK_CONFIDENCE, ModelPrior, PriorConfig, PriorSource,
    cross_tenant_key,
};
pub use router::{ModelRouter, ModelRouterBuilder, RouterConfig, TenantRouter};
pub use shared_store::{
    CREATE_SHARED_KV_TABLE_SQL, InMemorySharedStore, SharedStore, SqliteSharedStore,
};
pub use snapshot::SnapshotFile;
pub use types::{
    ArmStatistics, DEFAULT_TENANT, Phase, RouterStatistics, RoutingDecision, RoutingKey,
    RoutingReason,
};
