//! Load-Band Classification
//!
//! Every statistic the analyst keeps is conditioned on the generator's load
//! band so that readings are only compared against readings taken under
//! similar operating conditions.
//!
//! | Band     | Power fraction |
//! |----------|----------------|
//! | STOPPED  | exactly 0 %    |
//! | LIGHT    | (0, 20) %      |
//! | MODERATE | [20, 40) %     |
//! | NORMAL   | [40, 60) %     |
//! | HEAVY    | [60, 80) %     |
//! | MAX      | [80, 100] %    |

use serde::{Deserialize, Serialize};

use crate::types::{MetricKind, MetricSample};

/// Engine speed below which the engine is considered not running (RPM)
pub const STOPPED_RPM_MAX: f64 = 100.0;

/// Raw power values above this are not percentages
const PERCENT_CEILING: f64 = 125.0;

/// Raw power values up to this are hundredths of a percent
const CENTI_PERCENT_CEILING: f64 = 12_500.0;

/// Discretized generator output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBand {
    #[default]
    Stopped,
    Light,
    Moderate,
    Normal,
    Heavy,
    Max,
}

impl LoadBand {
    pub const ALL: [Self; 6] = [
        Self::Stopped,
        Self::Light,
        Self::Moderate,
        Self::Normal,
        Self::Heavy,
        Self::Max,
    ];

    /// Bands that carry baselines. STOPPED never does.
    pub const RUNNING: [Self; 5] = [
        Self::Light,
        Self::Moderate,
        Self::Normal,
        Self::Heavy,
        Self::Max,
    ];

    /// Tag value used in store records
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Light => "LIGHT",
            Self::Moderate => "MODERATE",
            Self::Normal => "NORMAL",
            Self::Heavy => "HEAVY",
            Self::Max => "MAX",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|band| band.as_str().eq_ignore_ascii_case(tag))
    }

    /// Power fraction range for display, e.g. `"20-40%"`
    pub const fn range_label(self) -> &'static str {
        match self {
            Self::Stopped => "0%",
            Self::Light => "0-20%",
            Self::Moderate => "20-40%",
            Self::Normal => "40-60%",
            Self::Heavy => "60-80%",
            Self::Max => "80-100%",
        }
    }

    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for LoadBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a power fraction (percent of rated output) to its load band.
///
/// Out-of-range input is clamped to 0..=100 and NaN is treated as no output.
pub fn classify(power_fraction: f64) -> LoadBand {
    if power_fraction.is_nan() {
        return LoadBand::Stopped;
    }
    let p = power_fraction.clamp(0.0, 100.0);

    if p == 0.0 {
        LoadBand::Stopped
    } else if p < 20.0 {
        LoadBand::Light
    } else if p < 40.0 {
        LoadBand::Moderate
    } else if p < 60.0 {
        LoadBand::Normal
    } else if p < 80.0 {
        LoadBand::Heavy
    } else {
        LoadBand::Max
    }
}

// ============================================================================
// Sample Classification
// ============================================================================

/// Classifies whole samples, taking engine speed and controller power
/// encodings into account.
#[derive(Debug, Clone, Copy)]
pub struct LoadBandClassifier {
    rated_kw: f64,
}

impl LoadBandClassifier {
    pub const fn new(rated_kw: f64) -> Self {
        Self { rated_kw }
    }

    /// Normalize a raw controller power reading to percent of rated output.
    ///
    /// Controllers report either a percentage, hundredths of a percent, or
    /// watts depending on firmware.
    pub fn normalize_power(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        if raw <= PERCENT_CEILING {
            raw
        } else if raw <= CENTI_PERCENT_CEILING {
            raw / 100.0
        } else if self.rated_kw > 0.0 {
            (raw / 1000.0) / self.rated_kw * 100.0
        } else {
            100.0
        }
    }

    /// Normalized power fraction of a sample, 0 when not reported.
    pub fn power_fraction(&self, sample: &MetricSample) -> f64 {
        sample
            .get(MetricKind::PowerFraction)
            .map_or(0.0, |raw| self.normalize_power(raw))
    }

    /// Band for a sample. An engine turning slower than
    /// [`STOPPED_RPM_MAX`] is STOPPED regardless of reported power.
    pub fn classify_sample(&self, sample: &MetricSample) -> LoadBand {
        if let Some(rpm) = sample.get(MetricKind::EngineSpeed) {
            if rpm < STOPPED_RPM_MAX {
                return LoadBand::Stopped;
            }
        }
        classify(self.power_fraction(sample))
    }
}

impl Default for LoadBandClassifier {
    fn default() -> Self {
        Self::new(crate::config::defaults::DEFAULT_RATED_KW)
    }
}
