//! Context vectors for the contextual bandits
//!
//! A context is a typed mapping from feature name to value. Missing
//! features read as `0.0`, so split and prediction logic never has to
//! special-case absent keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value reported for features a context doesn't carry
pub const MISSING_FEATURE_VALUE: f64 = 0.0;

/// Feature name -> numeric value for one decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextVector {
    features: BTreeMap<String, f64>,
}

impl ContextVector {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature (builder style)
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a feature; non-finite values are stored as the missing value
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let value = if value.is_finite() {
            value
        } else {
            MISSING_FEATURE_VALUE
        };
        self.features.insert(name.into(), value);
    }

    /// Value of a feature, `0.0` if absent
    pub fn get(&self, name: &str) -> f64 {
        self.features
            .get(name)
            .copied()
            .unwrap_or(MISSING_FEATURE_VALUE)
    }

    /// Whether the feature is present
    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Feature names in sorted order
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Dense vector of exactly `dim` values laid out by `schema`
    ///
    /// Slot `i` holds the value of `schema[i]`, so a feature always lands in
    /// the same slot whatever else the context carries. Slots past the end
    /// of the schema are zero.
    pub fn project(&self, schema: &[String], dim: usize) -> Vec<f64> {
        let mut dense: Vec<f64> = schema.iter().take(dim).map(|name| self.get(name)).collect();
        dense.resize(dim, MISSING_FEATURE_VALUE);
        dense
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ContextVector {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut context = Self::new();
        for (name, value) in iter {
            context.insert(name, value);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_feature_defaults_to_zero() {
        let context = ContextVector::new().with("length", 3.0);
        assert_eq!(context.get("length"), 3.0);
        assert_eq!(context.get("unknown"), 0.0);
        assert!(!context.contains("unknown"));
    }

    #[test]
    fn test_non_finite_values_are_neutralized() {
        let context = ContextVector::new().with("x", f64::INFINITY);
        assert_eq!(context.get("x"), 0.0);
        assert!(context.contains("x"));
    }

    #[test]
    fn test_project_follows_schema() {
        let schema = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let context: ContextVector = [("b", 2.0), ("a", 1.0), ("c", 3.0)].into_iter().collect();
        assert_eq!(context.project(&schema, 2), vec![3.0, 1.0]);
        assert_eq!(context.project(&schema, 5), vec![3.0, 1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_project_slot_does_not_depend_on_other_features() {
        let schema = vec!["latency".to_string(), "priority".to_string()];
        let sparse = ContextVector::new().with("priority", 1.0);
        let explicit = ContextVector::new().with("latency", 0.0).with("priority", 1.0);
        assert_eq!(sparse.project(&schema, 2), vec![0.0, 1.0]);
        assert_eq!(sparse.project(&schema, 2), explicit.project(&schema, 2));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let context = ContextVector::new().with("a", 1.5);
        assert_eq!(serde_json::to_string(&context).unwrap(), r#"{"a":1.5}"#);
    }
}
