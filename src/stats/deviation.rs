//! Sigma deviation of a reading from its load-band baseline

use serde::{Deserialize, Serialize};

use crate::baseline::{BaselineConfidence, MetricStats};

/// Distance of a reading from the baseline mean, in standard deviations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationScore {
    pub sigma: f64,
    /// The baseline cannot support a sigma judgement. A score of 0 with
    /// this flag set means "unknown", not "normal".
    pub low_confidence: bool,
}

impl DeviationScore {
    pub const fn unknown() -> Self {
        Self {
            sigma: 0.0,
            low_confidence: true,
        }
    }
}

/// `|current - mean| / stddev` against a per-metric baseline.
///
/// A zero (or non-finite) standard deviation yields 0σ flagged
/// low-confidence. Provisional baselines score normally but are
/// flagged as well.
pub fn deviation_score(current: f64, baseline: &MetricStats) -> DeviationScore {
    let std_dev = baseline.std_dev();
    if std_dev <= 0.0 || !std_dev.is_finite() || !current.is_finite() {
        return DeviationScore::unknown();
    }

    DeviationScore {
        sigma: (current - baseline.mean()).abs() / std_dev,
        low_confidence: baseline.confidence < BaselineConfidence::Low,
    }
}
