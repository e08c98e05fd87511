//! Beta-Bernoulli posterior for a single arm
//!
//! Each arm keeps a Beta(α, β) belief over its expected reward. An update
//! with reward `r ∈ [0, 1]` adds `r` to α and `1 - r` to β, so every
//! observation contributes exactly one pseudo-count.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

/// Beta-Bernoulli belief over an arm's expected reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    /// Beta distribution alpha parameter (pseudo-successes + 1)
    pub alpha: f64,
    /// Beta distribution beta parameter (pseudo-failures + 1)
    pub beta: f64,
    /// Number of observed rewards
    pub trials: u64,
    /// Time of the most recent update (or creation)
    pub last_updated: DateTime<Utc>,
}

impl Default for Posterior {
    fn default() -> Self {
        Self::new()
    }
}

impl Posterior {
    /// Uninformed prior (Beta(1,1) = uniform distribution)
    pub fn new() -> Self {
        Self::from_prior(1.0, 1.0)
    }

    /// Create a posterior seeded with informative prior parameters
    ///
    /// Parameters below 1.0 are raised to 1.0 so the belief stays unimodal.
    pub fn from_prior(alpha: f64, beta: f64) -> Self {
        Self {
            alpha: sanitize(alpha),
            beta: sanitize(beta),
            trials: 0,
            last_updated: Utc::now(),
        }
    }

    /// Draw one value from Beta(alpha, beta)
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => self.mean(),
        }
    }

    /// Record one observed reward. The caller clamps `reward` into `[0, 1]`.
    pub fn update(&mut self, reward: f64) {
        self.alpha += reward;
        self.beta += 1.0 - reward;
        self.trials += 1;
        self.last_updated = Utc::now();
    }

    /// Expected value of the Beta distribution
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Variance of the Beta distribution
    pub fn variance(&self) -> f64 {
        let ab = self.alpha + self.beta;
        (self.alpha * self.beta) / (ab * ab * (ab + 1.0))
    }

    /// Standard deviation of the Beta distribution
    pub fn uncertainty(&self) -> f64 {
        self.variance().sqrt()
    }
}

fn sanitize(param: f64) -> f64 {
    if param.is_finite() { param.max(1.0) } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_new_is_uniform() {
        let p = Posterior::new();
        assert_eq!(p.alpha, 1.0);
        assert_eq!(p.beta, 1.0);
        assert_eq!(p.trials, 0);
        assert!((p.mean() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_update_adds_one_pseudo_count() {
        let mut p = Posterior::new();
        for reward in [1.0, 0.0, 0.25, 0.75, 0.5] {
            p.update(reward);
            assert!((p.alpha + p.beta - (2.0 + p.trials as f64)).abs() < 1e-9);
        }
        assert_eq!(p.trials, 5);
        assert!((p.alpha - 3.5).abs() < 1e-12);
        assert!((p.beta - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_stays_in_open_interval() {
        let mut p = Posterior::new();
        for _ in 0..1000 {
            p.update(1.0);
        }
        assert!(p.mean() < 1.0);
        assert!(p.mean() > 0.99);
    }

    #[test]
    fn test_sample_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = Posterior::from_prior(3.0, 9.0);
        for _ in 0..200 {
            let s = p.sample(&mut rng);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_from_prior_sanitizes_parameters() {
        let p = Posterior::from_prior(0.2, f64::NAN);
        assert_eq!(p.alpha, 1.0);
        assert_eq!(p.beta, 1.0);
    }

    #[test]
    fn test_variance_shrinks_with_trials() {
        let mut p = Posterior::new();
        let before = p.variance();
        for _ in 0..20 {
            p.update(0.5);
        }
        assert!(p.variance() < before);
        assert!(p.uncertainty() > 0.0);
    }

    #[test]
    fn test_state_round_trip() {
        let mut p = Posterior::new();
        p.update(1.0);
        p.update(0.0);
        p.update(0.5);

        let json = serde_json::to_string(&p).unwrap();
        let restored: Posterior = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, p);
    }
}
