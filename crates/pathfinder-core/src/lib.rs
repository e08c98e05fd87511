//! Pathfinder Core Library
//!
//! This crate provides the adaptive decision layer used to route requests
//! to downstream models:
//! - Beta-Bernoulli posteriors and a Thompson Sampling router
//! - Cold-start priors from benchmarks and cross-tenant aggregates
//! - Doubly-robust and offset-tree contextual bandits
//! - Snapshot persistence and configuration

pub mod config;
pub mod error;
pub mod routing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::routing::{
        ContextVector, ContextualPolicy, ModelRouter, Phase, RoutingDecision, RoutingKey,
    };
}
