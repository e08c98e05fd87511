//! CLI integration tests for pathfinder
//!
//! Tests the pathfinder CLI commands end-to-end using assert_cmd. Every
//! test points PATHFINDER_CONFIG_DIR at its own temporary directory, so the
//! config file and router snapshot never leak between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a command isolated in `dir`
#[allow(deprecated)]
fn pathfinder_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pathfinder").unwrap();
    cmd.env("PATHFINDER_CONFIG_DIR", dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: std::process::Output) -> serde_json::Value {
    assert!(output.status.success(), "command failed: {:?}", output);
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_config_path_uses_override_dir() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            dir.path().to_string_lossy().to_string(),
        ));
}

#[test]
fn test_config_set_get_round_trip() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["config", "set", "router.cold_start_trials", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set router.cold_start_trials = 3"));

    pathfinder_cmd(&dir)
        .args(["config", "get", "router.cold_start_trials"])
        .assert()
        .success()
        .stdout(predicate::str::diff("3\n"));

    assert!(dir.path().join("config.toml").exists());
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["config", "set", "priors.prior_confidence", "2.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("prior_confidence"));

    pathfinder_cmd(&dir)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_list_and_reset() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["config", "set", "router.enabled", "false"])
        .assert()
        .success();

    pathfinder_cmd(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("router.enabled = false"))
        .stdout(predicate::str::contains("offset_tree.max_depth = 4"));

    pathfinder_cmd(&dir)
        .args(["config", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset to defaults"));

    pathfinder_cmd(&dir)
        .args(["config", "get", "router.enabled"])
        .assert()
        .success()
        .stdout(predicate::str::diff("true\n"));
}

#[test]
fn test_stats_empty() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No routing data yet"));
}

#[test]
fn test_select_picks_a_candidate() {
    let dir = TempDir::new().unwrap();

    let output = pathfinder_cmd(&dir)
        .args([
            "select",
            "--task",
            "summarize",
            "--candidates",
            "small,large",
            "--quiet",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let arm = String::from_utf8(output.stdout).unwrap();
    assert!(matches!(arm.trim(), "small" | "large"), "got {:?}", arm);
}

#[test]
fn test_select_json_reports_cold_start() {
    let dir = TempDir::new().unwrap();

    let output = pathfinder_cmd(&dir)
        .args([
            "select",
            "--task",
            "summarize",
            "--candidates",
            "small,large",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    let decision = stdout_json(output);

    assert_eq!(decision["phase"], "cold_start");
    assert_eq!(decision["routing_key"]["tenant"], "default");
    assert_eq!(decision["alternatives"].as_array().unwrap().len(), 1);
}

#[test]
fn test_disabled_router_returns_first_candidate() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["config", "set", "router.enabled", "false"])
        .assert()
        .success();

    pathfinder_cmd(&dir)
        .args([
            "select",
            "--task",
            "summarize",
            "--candidates",
            "large,small",
            "--quiet",
        ])
        .assert()
        .success()
        .stdout(predicate::str::diff("large\n"));
}

#[test]
fn test_reward_is_persisted_and_clamped() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["reward", "--task", "summarize", "--arm", "small", "--reward", "-3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded reward for small"));
    assert!(dir.path().join("router.json").exists());

    let output = pathfinder_cmd(&dir)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    let stats = stdout_json(output);

    let arm = &stats["default:summarize"]["small"];
    assert_eq!(arm["trials"], 1);
    assert_eq!(arm["alpha"], 1.0);
    assert_eq!(arm["beta"], 2.0);
}

#[test]
fn test_reward_rejects_nan() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["reward", "--task", "summarize", "--arm", "small", "--reward", "NaN"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("finite"));
}

#[test]
fn test_tenants_are_isolated() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args([
            "reward", "--task", "summarize", "--arm", "small", "--reward", "1", "--tenant", "acme",
        ])
        .assert()
        .success();

    let output = pathfinder_cmd(&dir)
        .args(["stats", "--task", "summarize", "--format", "json"])
        .output()
        .unwrap();
    let stats = stdout_json(output);

    assert!(stats.get("acme:summarize").is_some());
    assert!(stats.get("default:summarize").is_none());
}

#[test]
fn test_prior_defaults_to_uniform() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args(["prior", "small"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source: uniform"))
        .stdout(predicate::str::contains("Beta(1.000, 1.000)"));
}

#[test]
fn test_aggregate_requires_store() {
    let dir = TempDir::new().unwrap();

    pathfinder_cmd(&dir)
        .args([
            "aggregate", "small", "--mean", "0.8", "--variance", "0.01", "--samples", "100",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No shared store configured"));
}

#[test]
fn test_aggregate_feeds_cross_tenant_prior() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("shared.db");

    pathfinder_cmd(&dir)
        .args(["config", "set", "priors.store_path", store.to_str().unwrap()])
        .assert()
        .success();

    pathfinder_cmd(&dir)
        .args([
            "aggregate", "small", "--mean", "0.8", "--variance", "0.01", "--samples", "100",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored aggregate for small"));

    let output = pathfinder_cmd(&dir)
        .args(["prior", "small", "--tenant", "acme", "--format", "json"])
        .output()
        .unwrap();
    let prior = stdout_json(output);

    assert_eq!(prior["prior"]["source"], "cross_tenant");
    assert_eq!(prior["prior"]["sample_count"], 100);
    let alpha = prior["alpha"].as_f64().unwrap();
    let beta = prior["beta"].as_f64().unwrap();
    assert!(alpha > beta);
}

#[test]
fn test_aggregate_below_threshold_is_ignored() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("shared.db");

    pathfinder_cmd(&dir)
        .args(["config", "set", "priors.store_path", store.to_str().unwrap()])
        .assert()
        .success();

    pathfinder_cmd(&dir)
        .args([
            "aggregate", "small", "--mean", "0.9", "--variance", "0.01", "--samples", "3",
        ])
        .assert()
        .success();

    pathfinder_cmd(&dir)
        .args(["prior", "small"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source: uniform"));
}
