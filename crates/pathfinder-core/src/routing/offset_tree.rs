//! Offset-tree contextual bandit
//!
//! The context space is partitioned by a binary tree. Every leaf keeps its
//! own per-arm reward statistics, so an arm that is good for short prompts
//! and bad for long ones can win in one region and lose in the other.
//!
//! Leaves start as a single `root` node. Once a leaf has seen enough
//! samples, the recorded history for that leaf is scanned for the
//! `(feature, median)` split that most reduces the reward variance within
//! each arm; when the reduction clears `split_threshold` the leaf becomes
//! an internal node with two fresh children.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::ContextVector;
use super::policy::{
    ArmSummary, ContextualPolicy, PolicyState, PolicyStatistics, require_candidates,
    require_finite_reward,
};
use crate::error::{Error, Result};

/// Id of the node every lookup starts from
pub const ROOT_NODE_ID: &str = "root";

/// Context history length that triggers a trim
pub const MAX_CONTEXT_HISTORY: usize = 10_000;

/// Entries kept after a trim
pub const TRIMMED_CONTEXT_HISTORY: usize = 5_000;

/// Configuration for the offset-tree bandit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetTreeConfig {
    /// Leaves at this depth never split
    pub max_depth: usize,
    /// Samples a leaf needs before a split is considered
    pub min_samples_split: u64,
    /// Minimum variance reduction for a split
    pub split_threshold: f64,
    /// Exploration bonus scale for leaf selection
    pub exploration: f64,
}

impl Default for OffsetTreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_samples_split: 20,
            split_threshold: 0.01,
            exploration: 1.0,
        }
    }
}

/// Running reward statistics for one arm inside one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalArmStats {
    pub count: u64,
    pub reward_sum: f64,
}

impl LocalArmStats {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.reward_sum / self.count as f64
        }
    }

    fn record(&mut self, reward: f64) {
        self.count += 1;
        self.reward_sum += reward;
    }
}

/// Ids of an internal node's children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeChildren {
    pub left: String,
    pub right: String,
}

/// A region of the context space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub depth: usize,
    pub is_leaf: bool,
    pub samples: u64,
    pub split_feature: Option<String>,
    pub split_value: Option<f64>,
    pub children: Option<NodeChildren>,
    pub arm_stats: BTreeMap<String, LocalArmStats>,
}

impl TreeNode {
    fn leaf(id: impl Into<String>, depth: usize) -> Self {
        Self {
            id: id.into(),
            depth,
            is_leaf: true,
            samples: 0,
            split_feature: None,
            split_value: None,
            children: None,
            arm_stats: BTreeMap::new(),
        }
    }

    fn record(&mut self, arm: &str, reward: f64) {
        self.samples += 1;
        self.arm_stats
            .entry(arm.to_string())
            .or_default()
            .record(reward);
    }

    /// Child a context routes to, if this node has been split
    fn route(&self, context: &ContextVector) -> Option<&str> {
        if self.is_leaf {
            return None;
        }
        let feature = self.split_feature.as_deref()?;
        let value = self.split_value?;
        let children = self.children.as_ref()?;
        if context.get(feature) <= value {
            Some(&children.left)
        } else {
            Some(&children.right)
        }
    }
}

/// Persisted form of [`OffsetTreeBandit`]
///
/// The context history is not persisted; a reloaded tree keeps its shape
/// and statistics and starts collecting split evidence again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetTreeState {
    pub max_depth: usize,
    pub min_samples_split: u64,
    pub split_threshold: f64,
    #[serde(default = "default_exploration")]
    pub exploration: f64,
    pub tree_nodes: BTreeMap<String, TreeNode>,
    pub counts: BTreeMap<String, u64>,
    pub q_values: BTreeMap<String, f64>,
}

fn default_exploration() -> f64 {
    OffsetTreeConfig::default().exploration
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    context: ContextVector,
    arm: String,
    reward: f64,
    node_id: String,
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature: String,
    threshold: f64,
    gain: f64,
}

/// Contextual bandit with per-region statistics on a binary tree
#[derive(Debug, Clone)]
pub struct OffsetTreeBandit {
    config: OffsetTreeConfig,
    nodes: BTreeMap<String, TreeNode>,
    counts: BTreeMap<String, u64>,
    q_values: BTreeMap<String, f64>,
    context_history: VecDeque<HistoryEntry>,
}

impl OffsetTreeBandit {
    /// Create a tree holding only the root leaf
    pub fn new(config: OffsetTreeConfig) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_NODE_ID.to_string(), TreeNode::leaf(ROOT_NODE_ID, 0));
        Self {
            config,
            nodes,
            counts: BTreeMap::new(),
            q_values: BTreeMap::new(),
            context_history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &OffsetTreeConfig {
        &self.config
    }

    /// Id of the leaf a context falls into
    ///
    /// The walk takes at most `max_depth + 1` steps.
    pub fn get_node_id(&self, context: &ContextVector) -> &str {
        let Some(mut node) = self.nodes.get(ROOT_NODE_ID) else {
            return ROOT_NODE_ID;
        };
        for _ in 0..=self.config.max_depth {
            match node.route(context).and_then(|next| self.nodes.get(next)) {
                Some(child) => node = child,
                None => break,
            }
        }
        &node.id
    }

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Number of leaves in the tree
    pub fn leaf_count(&self) -> usize {
        self.nodes.values().filter(|node| node.is_leaf).count()
    }

    pub fn context_history_len(&self) -> usize {
        self.context_history.len()
    }

    /// Whether the node would split given its current history
    pub fn should_split(&self, node_id: &str) -> bool {
        self.best_split(node_id).is_some()
    }

    fn score(&self, node: Option<&TreeNode>, arm: &str, global_total: u64) -> f64 {
        let c = self.config.exploration;

        if let Some(node) = node {
            if let Some(local) = node.arm_stats.get(arm).filter(|s| s.count > 0) {
                let bonus = ((node.samples as f64 + 1.0).ln() / local.count as f64).sqrt();
                return local.mean() + c * bonus;
            }
        }

        match self.counts.get(arm).copied().unwrap_or(0) {
            0 => f64::INFINITY,
            n => {
                let q = self.q_values.get(arm).copied().unwrap_or(0.0);
                q + c * ((global_total as f64 + 1.0).ln() / n as f64).sqrt()
            }
        }
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        self.context_history.push_back(entry);
        if self.context_history.len() > MAX_CONTEXT_HISTORY {
            let excess = self.context_history.len() - TRIMMED_CONTEXT_HISTORY;
            self.context_history.drain(..excess);
        }
    }

    fn best_split(&self, node_id: &str) -> Option<SplitCandidate> {
        let node = self.nodes.get(node_id)?;
        if !node.is_leaf
            || node.depth >= self.config.max_depth
            || node.samples < self.config.min_samples_split
        {
            return None;
        }

        let samples: Vec<&HistoryEntry> = self
            .context_history
            .iter()
            .filter(|entry| entry.node_id == node_id)
            .collect();
        if samples.len() < 2 {
            return None;
        }

        let features: BTreeSet<&str> = samples
            .iter()
            .flat_map(|entry| entry.context.feature_names())
            .collect();
        let parent = within_arm_sse(samples.iter().copied());
        let n = samples.len() as f64;

        let mut best: Option<SplitCandidate> = None;
        for feature in features {
            let mut values: Vec<f64> = samples.iter().map(|e| e.context.get(feature)).collect();
            values.sort_by(f64::total_cmp);
            let threshold = median(&values);

            let (left, right): (Vec<&HistoryEntry>, Vec<&HistoryEntry>) = samples
                .iter()
                .copied()
                .partition(|entry| entry.context.get(feature) <= threshold);
            if left.is_empty() || right.is_empty() {
                continue;
            }

            let children = within_arm_sse(left.into_iter()) + within_arm_sse(right.into_iter());
            let gain = (parent - children) / n;
            if gain > self.config.split_threshold && best.as_ref().is_none_or(|b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature: feature.to_string(),
                    threshold,
                    gain,
                });
            }
        }
        best
    }

    fn split(&mut self, node_id: &str, candidate: SplitCandidate) -> Result<()> {
        let depth = self
            .nodes
            .get(node_id)
            .map(|node| node.depth)
            .ok_or_else(|| Error::StateCorruption(format!("missing tree node {}", node_id)))?;

        let mut left = TreeNode::leaf(format!("{}.l", node_id), depth + 1);
        let mut right = TreeNode::leaf(format!("{}.r", node_id), depth + 1);

        for entry in self
            .context_history
            .iter_mut()
            .filter(|entry| entry.node_id == node_id)
        {
            let child = if entry.context.get(&candidate.feature) <= candidate.threshold {
                &mut left
            } else {
                &mut right
            };
            child.record(&entry.arm, entry.reward);
            entry.node_id = child.id.clone();
        }

        debug!(
            node = %node_id,
            feature = %candidate.feature,
            threshold = candidate.threshold,
            gain = candidate.gain,
            left_samples = left.samples,
            right_samples = right.samples,
            "Split offset tree node"
        );

        if let Some(node) = self.nodes.get_mut(node_id) {
            node.is_leaf = false;
            node.split_feature = Some(candidate.feature);
            node.split_value = Some(candidate.threshold);
            node.children = Some(NodeChildren {
                left: left.id.clone(),
                right: right.id.clone(),
            });
        }
        self.nodes.insert(left.id.clone(), left);
        self.nodes.insert(right.id.clone(), right);
        Ok(())
    }
}

/// Check that the nodes reachable from the root form a tree
///
/// Every child must sit one level below its parent and be reached exactly
/// once, and no node may lie deeper than `max_depth`.
fn validate_tree(nodes: &BTreeMap<String, TreeNode>, max_depth: usize) -> Result<()> {
    if let Some((key, node)) = nodes.iter().find(|(key, node)| **key != node.id) {
        return Err(Error::StateCorruption(format!(
            "tree node stored under {} has id {}",
            key, node.id
        )));
    }
    let root = nodes.get(ROOT_NODE_ID).ok_or_else(|| {
        Error::StateCorruption("offset tree snapshot has no root node".to_string())
    })?;
    if root.depth != 0 {
        return Err(Error::StateCorruption(format!(
            "root node has depth {}",
            root.depth
        )));
    }

    let mut visited: BTreeSet<&str> = BTreeSet::from([ROOT_NODE_ID]);
    let mut pending = vec![root];
    while let Some(node) = pending.pop() {
        if node.depth > max_depth {
            return Err(Error::StateCorruption(format!(
                "tree node {} is deeper than max_depth {}",
                node.id, max_depth
            )));
        }
        if node.is_leaf {
            continue;
        }

        let children = match (&node.split_feature, node.split_value, &node.children) {
            (Some(_), Some(_), Some(children)) => children,
            _ => {
                return Err(Error::StateCorruption(format!(
                    "internal tree node {} has an incomplete split",
                    node.id
                )));
            }
        };
        for child_id in [&children.left, &children.right] {
            let child = nodes.get(child_id).ok_or_else(|| {
                Error::StateCorruption(format!(
                    "tree node {} points at missing child {}",
                    node.id, child_id
                ))
            })?;
            if !visited.insert(child_id.as_str()) {
                return Err(Error::StateCorruption(format!(
                    "tree node {} is reachable more than once",
                    child_id
                )));
            }
            if child.depth != node.depth + 1 {
                return Err(Error::StateCorruption(format!(
                    "tree node {} has depth {} under parent depth {}",
                    child.id, child.depth, node.depth
                )));
            }
            pending.push(child);
        }
    }

    Ok(())
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Sum of squared deviations of each arm's rewards from that arm's mean
fn within_arm_sse<'a>(entries: impl Iterator<Item = &'a HistoryEntry>) -> f64 {
    let mut sums: BTreeMap<&str, (f64, f64, f64)> = BTreeMap::new();
    for entry in entries {
        let (n, sum, sum_sq) = sums.entry(&entry.arm).or_default();
        *n += 1.0;
        *sum += entry.reward;
        *sum_sq += entry.reward * entry.reward;
    }
    sums.values()
        .map(|(n, sum, sum_sq)| (sum_sq - sum * sum / n).max(0.0))
        .sum()
}

impl ContextualPolicy for OffsetTreeBandit {
    fn recommend(&mut self, context: &ContextVector, candidates: &[String]) -> Result<String> {
        require_candidates(candidates)?;
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }

        let node = self.nodes.get(self.get_node_id(context));
        let total: u64 = self.counts.values().sum();

        let mut best: Option<(&String, f64)> = None;
        for arm in candidates {
            let score = self.score(node, arm, total);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((arm, score));
            }
        }

        Ok(best.map_or_else(|| candidates[0].clone(), |(arm, _)| arm.clone()))
    }

    fn update(&mut self, arm: &str, reward: f64, context: &ContextVector) -> Result<()> {
        let reward = require_finite_reward(reward)?;

        let count = self.counts.entry(arm.to_string()).or_insert(0);
        *count += 1;
        let n = *count as f64;
        let q = self.q_values.entry(arm.to_string()).or_insert(0.0);
        *q += (reward - *q) / n;

        let node_id = self.get_node_id(context).to_string();
        self.push_history(HistoryEntry {
            context: context.clone(),
            arm: arm.to_string(),
            reward,
            node_id: node_id.clone(),
        });

        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::StateCorruption(format!("missing tree node {}", node_id)))?;
        node.record(arm, reward);

        // Split checks scan the history, so only run them every
        // min_samples_split samples per node.
        let cadence = self.config.min_samples_split.max(1);
        if node.samples % cadence == 0 {
            if let Some(candidate) = self.best_split(&node_id) {
                self.split(&node_id, candidate)?;
            }
        }
        Ok(())
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
        PolicyState::OffsetTree(OffsetTreeState {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            split_threshold: self.config.split_threshold,
            exploration: self.config.exploration,
            tree_nodes: self.nodes.clone(),
            counts: self.counts.clone(),
            q_values: self.q_values.clone(),
        })
    }

    fn from_state(state: PolicyState) -> Result<Self> {
        let found = state.policy_name();
        let PolicyState::OffsetTree(state) = state else {
            return Err(Error::StateCorruption(format!(
                "expected offset_tree snapshot, found {}",
                found
            )));
        };

        validate_tree(&state.tree_nodes, state.max_depth)?;

        Ok(Self {
            config: OffsetTreeConfig {
                max_depth: state.max_depth,
                min_samples_split: state.min_samples_split,
                split_threshold: state.split_threshold,
                exploration: state.exploration,
            },
            nodes: state.tree_nodes,
            counts: state.counts,
            q_values: state.q_values,
            context_history: VecDeque::new(),
        })
    }
}
