//! Pathfinder CLI - inspect and drive the adaptive model router

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use pathfinder_core::config::Config;
use pathfinder_core::routing::{
    BenchmarkTable, ColdStartPriorService, ModelRouter, RoutingReason, SqliteSharedStore,
};
use tracing::debug;

#[derive(Parser)]
#[command(name = "pathfinder")]
#[command(author, version, about = "Adaptive model routing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show router statistics from the snapshot
    Stats {
        /// Only show routing keys for this task
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Select an arm for a task
    Select {
        /// Task name
        #[arg(short, long)]
        task: String,
        /// Comma-separated candidate arms
        #[arg(short, long, value_delimiter = ',', required = true)]
        candidates: Vec<String>,
        /// Tenant (defaults to the shared default tenant)
        #[arg(long)]
        tenant: Option<String>,
        /// Pick the highest posterior mean instead of sampling
        #[arg(short, long)]
        deterministic: bool,
    },

    /// Record a reward for an arm
    Reward {
        /// Task name
        #[arg(short, long)]
        task: String,
        /// Arm that served the request
        #[arg(short, long)]
        arm: String,
        /// Observed reward in [0, 1]
        #[arg(short, long, allow_negative_numbers = true)]
        reward: f64,
        /// Tenant (defaults to the shared default tenant)
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Show the cold-start prior resolved for an arm
    Prior {
        /// Arm name
        arm: String,
        /// Tenant requesting the prior
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Publish a cross-tenant aggregate for an arm
    Aggregate {
        /// Arm name
        arm: String,
        /// Mean reward across tenants
        #[arg(long)]
        mean: f64,
        /// Reward variance across tenants
        #[arg(long)]
        variance: f64,
        /// Number of pooled samples
        #[arg(long)]
        samples: u64,
        /// Expiry override in seconds
        #[arg(long)]
        ttl_seconds: Option<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pathfinder=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Commands::Stats { task } => cmd_stats(task.as_deref(), format, cli.quiet).await,

        Commands::Select {
            task,
            candidates,
            tenant,
            deterministic,
        } => {
            cmd_select(
                &task,
                &candidates,
                tenant.as_deref(),
                deterministic,
                format,
                cli.quiet,
            )
            .await
        }

        Commands::Reward {
            task,
            arm,
            reward,
            tenant,
        } => cmd_reward(&task, &arm, reward, tenant.as_deref(), format, cli.quiet).await,

        Commands::Prior { arm, tenant } => {
            cmd_prior(&arm, tenant.as_deref(), format, cli.quiet).await
        }

        Commands::Aggregate {
            arm,
            mean,
            variance,
            samples,
            ttl_seconds,
        } => cmd_aggregate(&arm, mean, variance, samples, ttl_seconds, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, format, cli.quiet),
    }
}

// ============================================================================
// Service Construction
// ============================================================================

/// Snapshot location: the configured path, or `router.json` in the config dir
fn router_state_path(config: &Config) -> anyhow::Result<PathBuf> {
    match &config.router.state_path {
        Some(path) => Ok(path.clone()),
        None => Ok(Config::config_dir()?.join("router.json")),
    }
}

async fn build_prior_service(config: &Config) -> anyhow::Result<ColdStartPriorService> {
    let mut service = ColdStartPriorService::new(config.priors.clone());

    if let Some(path) = &config.priors.benchmarks_path {
        let table = BenchmarkTable::from_json_file(path)
            .with_context(|| format!("Failed to load benchmarks: {}", path.display()))?;
        debug!(entries = table.len(), "Loaded benchmark table");
        service = service.with_benchmarks(table);
    }

    if let Some(path) = &config.priors.store_path {
        let store = SqliteSharedStore::connect(path)
            .await
            .with_context(|| format!("Failed to open shared store: {}", path.display()))?;
        service = service.with_store(Arc::new(store));
    }

    Ok(service)
}

async fn build_router(config: &Config) -> anyhow::Result<ModelRouter> {
    let priors = build_prior_service(config).await?;
    Ok(ModelRouter::builder()
        .config(config.router.clone())
        .state_path(router_state_path(config)?)
        .priors(Arc::new(priors))
        .build())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_stats(task: Option<&str>, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;
    let stats = router.get_statistics(task).await;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }
    if quiet {
        return Ok(());
    }

    if stats.is_empty() {
        println!("No routing data yet");
        return Ok(());
    }

    println!("Routing Statistics:");
    for (key, arms) in &stats {
        println!();
        println!("  {}", key);
        for (arm, s) in arms {
            println!(
                "    {:<24} mean={:.3} alpha={:.2} beta={:.2} trials={}",
                arm, s.mean, s.alpha, s.beta, s.trials
            );
        }
    }
    Ok(())
}

async fn cmd_select(
    task: &str,
    candidates: &[String],
    tenant: Option<&str>,
    deterministic: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;

    let decision = match tenant {
        Some(tenant) => {
            router
                .for_tenant(tenant)
                .select_arm(task, candidates, deterministic)
                .await?
        }
        None => router.select_arm(task, candidates, deterministic).await?,
    };

    // Persist priors seeded for arms this key had never seen
    router.save().await?;

    if format == OutputFormat::Json {
        return print_json(&decision);
    }

    if quiet {
        println!("{}", decision.arm);
        return Ok(());
    }

    println!("Selected: {}", decision.arm);
    println!("  Routing key: {}", decision.routing_key);
    println!("  Phase: {}", decision.phase);
    match &decision.reason {
        RoutingReason::Disabled => println!("  Reason: routing disabled"),
        RoutingReason::SingleCandidate => println!("  Reason: single candidate"),
        RoutingReason::Exploration => println!("  Reason: cold-start exploration"),
        RoutingReason::Sampled { sampled_value } => {
            println!("  Reason: sampled value {:.3}", sampled_value)
        }
        RoutingReason::Exploitation { expected_reward } => {
            println!("  Reason: expected reward {:.3}", expected_reward)
        }
    }
    if !decision.alternatives.is_empty() {
        println!("  Alternatives: {}", decision.alternatives.join(", "));
    }
    println!("  Decision ID: {}", decision.decision_id);
    Ok(())
}

async fn cmd_reward(
    task: &str,
    arm: &str,
    reward: f64,
    tenant: Option<&str>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let router = build_router(&config).await?;

    match tenant {
        Some(tenant) => {
            router
                .for_tenant(tenant)
                .update_reward(task, arm, reward)
                .await?
        }
        None => router.update_reward(task, arm, reward).await?,
    };
    router.save().await?;

    let stats = router.get_statistics(Some(task)).await;
    let tenant_key = pathfinder_core::routing::RoutingKey::new(tenant, task).to_string();
    let arm_stats = stats
        .get(&tenant_key)
        .and_then(|arms| arms.get(arm))
        .ok_or_else(|| anyhow!("No statistics recorded for {} on {}", arm, tenant_key))?;

    if format == OutputFormat::Json {
        return print_json(arm_stats);
    }
    if !quiet {
        println!(
            "Recorded reward for {} on {} (mean={:.3}, trials={})",
            arm, tenant_key, arm_stats.mean, arm_stats.trials
        );
    }
    Ok(())
}

async fn cmd_prior(
    arm: &str,
    tenant: Option<&str>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let service = build_prior_service(&config).await?;
    let tenant = tenant.unwrap_or(pathfinder_core::routing::DEFAULT_TENANT);

    let prior = service.get_model_prior(arm, tenant).await;
    let (alpha, beta) = service.beta_parameters(&prior);

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "arm": arm,
            "prior": prior,
            "alpha": alpha,
            "beta": beta,
        }));
    }
    if quiet {
        println!("{} {}", alpha, beta);
        return Ok(());
    }

    println!("Prior for {}:", arm);
    println!("  Source: {}", prior.source);
    println!("  Mean reward: {:.3}", prior.mean_reward);
    println!("  Confidence: {:.3}", prior.confidence);
    println!("  Samples: {}", prior.sample_count);
    println!("  Beta({:.3}, {:.3})", alpha, beta);
    Ok(())
}

async fn cmd_aggregate(
    arm: &str,
    mean: f64,
    variance: f64,
    samples: u64,
    ttl_seconds: Option<u64>,
    quiet: bool,
) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&mean) {
        return Err(anyhow!("Mean reward must be between 0.0 and 1.0"));
    }
    if !variance.is_finite() || variance < 0.0 {
        return Err(anyhow!("Variance must be non-negative"));
    }

    let config = Config::load()?;
    if config.priors.store_path.is_none() {
        return Err(anyhow!(
            "No shared store configured. Set one with `pathfinder config set priors.store_path <path>`."
        ));
    }

    let service = build_prior_service(&config).await?;
    let stored = service
        .store_cross_tenant_aggregate(
            arm,
            mean,
            variance,
            samples,
            ttl_seconds.map(Duration::from_secs),
        )
        .await;
    if !stored {
        return Err(anyhow!("Failed to store aggregate for {}", arm));
    }

    if !quiet {
        println!("Stored aggregate for {} ({} samples)", arm, samples);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                return print_json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
