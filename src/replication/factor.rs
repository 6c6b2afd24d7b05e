//! Replication factor estimation
//!
//! Picks how many replicas a location needs from the observed availability
//! of peers, or returns a fixed factor when adaptation is off.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationFactorConfig {
    /// Factor used when not adaptive
    pub base: usize,
    /// Lower bound for the adaptive factor
    pub min: usize,
    /// Upper bound for the adaptive factor
    pub max: usize,
    /// Required probability that at least one replica is reachable
    pub target_durability: f64,
    /// Availability assumed before enough samples were seen
    pub initial_availability: f64,
    pub adaptive: bool,
}

impl Default for ReplicationFactorConfig {
    fn default() -> Self {
        Self {
            base: 6,
            min: 2,
            max: 10,
            target_durability: 0.999,
            initial_availability: 0.9,
            adaptive: false,
        }
    }
}

impl ReplicationFactorConfig {
    pub fn fixed(base: usize) -> Self {
        Self {
            base,
            adaptive: false,
            ..Default::default()
        }
    }

    pub fn adaptive(min: usize, max: usize, target_durability: f64) -> Self {
        Self {
            min,
            max,
            target_durability,
            adaptive: true,
            ..Default::default()
        }
    }

    /// Replicas needed for the configured durability at `availability`
    ///
    /// Smallest k with 1 - (1 - availability)^k >= target, within [min, max].
    pub fn factor_for_availability(&self, availability: f64) -> usize {
        if !self.adaptive {
            return self.base;
        }

        let unavailable = (1.0 - availability).clamp(0.0, 1.0);
        for k in 1..=self.max {
            if 1.0 - unavailable.powi(k as i32) >= self.target_durability {
                return k.clamp(self.min, self.max);
            }
        }
        self.max
    }
}

pub struct ReplicationFactorEstimator {
    config: ReplicationFactorConfig,
    current: AtomicUsize,
    /// Smoothed fraction of successful requests
    availability: RwLock<f64>,
    sample_count: AtomicU32,
    failure_count: AtomicU32,
}

impl ReplicationFactorEstimator {
    pub fn new(config: ReplicationFactorConfig) -> Self {
        let availability = config.initial_availability;
        let initial = config.factor_for_availability(availability);
        Self {
            config,
            current: AtomicUsize::new(initial),
            availability: RwLock::new(availability),
            sample_count: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
        }
    }

    pub fn record_success(&self) {
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        self.update_availability();
    }

    pub fn record_failure(&self) {
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.update_availability();
    }

    fn update_availability(&self) {
        let samples = self.sample_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);

        if samples >= 10 {
            let current_rate = 1.0 - failures as f64 / samples as f64;

            // Exponential moving average (alpha = 0.3)
            let mut availability = self.availability.write();
            *availability = *availability * 0.7 + current_rate * 0.3;

            // Reset counters periodically
            if samples >= 100 {
                self.sample_count.store(0, Ordering::Relaxed);
                self.failure_count.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Recompute the factor for a cluster of `cluster_size` nodes
    ///
    /// Never more replicas than there are other nodes.
    pub fn recompute(&self, cluster_size: usize) -> usize {
        let wanted = self.config.factor_for_availability(self.availability());
        let factor = wanted.min(cluster_size.saturating_sub(1));

        let previous = self.current.swap(factor, Ordering::Relaxed);
        if previous != factor {
            tracing::info!(
                "Replication factor {} -> {} (availability {:.3}, cluster {})",
                previous,
                factor,
                self.availability(),
                cluster_size
            );
        }
        factor
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn availability(&self) -> f64 {
        *self.availability.read()
    }

    pub fn config(&self) -> &ReplicationFactorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_factor() {
        let config = ReplicationFactorConfig::fixed(6);
        assert_eq!(config.factor_for_availability(0.1), 6);
        assert_eq!(config.factor_for_availability(0.99), 6);
    }

    #[test]
    fn test_adaptive_factor_from_availability() {
        let config = ReplicationFactorConfig::adaptive(1, 10, 0.999);

        // 1 - 0.05^2 = 0.9975, 1 - 0.05^3 = 0.999875
        assert_eq!(config.factor_for_availability(0.95), 3);
        // 1 - 0.5^10 = 0.99902
        assert_eq!(config.factor_for_availability(0.5), 10);
        assert_eq!(config.factor_for_availability(1.0), 1);
        assert_eq!(config.factor_for_availability(0.0), 10);
    }

    #[test]
    fn test_adaptive_factor_respects_bounds() {
        let config = ReplicationFactorConfig::adaptive(4, 6, 0.999);
        assert_eq!(config.factor_for_availability(0.99), 4);
        assert_eq!(config.factor_for_availability(0.2), 6);
    }

    #[test]
    fn test_capped_by_cluster_size() {
        let estimator = ReplicationFactorEstimator::new(ReplicationFactorConfig::fixed(6));
        assert_eq!(estimator.recompute(3), 2);
        assert_eq!(estimator.current(), 2);
        assert_eq!(estimator.recompute(1), 0);
        assert_eq!(estimator.recompute(20), 6);
    }

    #[test]
    fn test_failures_raise_factor() {
        let estimator =
            ReplicationFactorEstimator::new(ReplicationFactorConfig::adaptive(1, 10, 0.999));
        let before = estimator.recompute(50);

        for _ in 0..100 {
            estimator.record_failure();
        }

        assert!(estimator.availability() < 0.9);
        assert!(estimator.recompute(50) > before);
    }
}
