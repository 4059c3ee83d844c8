//! Welford running mean/variance

use serde::{Deserialize, Serialize};

/// Incremental mean and variance over a stream of readings.
///
/// Numerically stable, O(1) per sample, and cheap to persist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the running mean
    pub m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Rebuild the accumulator from a persisted summary.
    pub fn from_moments(mean: f64, std_dev: f64, count: u64) -> Self {
        let m2 = if count > 1 {
            std_dev * std_dev * (count - 1) as f64
        } else {
            0.0
        };
        Self {
            count,
            mean,
            m2,
            min: mean,
            max: mean,
        }
    }

    pub fn from_values(values: &[f64]) -> Self {
        let mut stats = Self::new();
        for &v in values {
            stats.push(v);
        }
        stats
    }

    /// Fold one reading in. Non-finite readings are rejected, since a
    /// single NaN would poison mean and m2 for good.
    pub fn push(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        true
    }

    /// Sample variance (n - 1)
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}
