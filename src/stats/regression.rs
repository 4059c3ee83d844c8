//! OLS trend detection with Student's t significance testing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::StatsError;
use crate::load_band::LoadBand;
use crate::types::MetricKind;

/// Minimum points before a trend is estimated
pub const MIN_TREND_POINTS: usize = 10;

/// Two-sided p-value below which a slope is significant
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Slopes smaller than this (units per sample) are physically meaningless
pub const MIN_SIGNIFICANT_SLOPE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Declining,
    Stable,
}

impl TrendDirection {
    pub fn from_slope(slope: f64) -> Self {
        if slope > 0.0 {
            Self::Increasing
        } else if slope < 0.0 {
            Self::Declining
        } else {
            Self::Stable
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Declining => "declining",
            Self::Stable => "stable",
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fit of value against sample index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Ordinary least squares of `values` against their index 0..n.
///
/// Returns `None` for fewer than 3 points, where the t-test has no
/// degrees of freedom.
pub fn linear_regression(values: &[f64]) -> Option<Regression> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    // Flat series: nothing to explain
    if syy == 0.0 {
        return Some(Regression {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 0.0,
            p_value: 1.0,
            n,
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse = (syy - slope * sxy).max(0.0);
    let r_squared = (1.0 - sse / syy).clamp(0.0, 1.0);

    Some(Regression {
        slope,
        intercept,
        r_squared,
        p_value: slope_p_value(slope, sse, sxx, n),
        n,
    })
}

/// Two-sided p-value for H0: slope == 0, with n - 2 degrees of freedom.
fn slope_p_value(slope: f64, sse: f64, sxx: f64, n: usize) -> f64 {
    let df = (n - 2) as f64;
    let std_err = (sse / df / sxx).sqrt();

    if std_err == 0.0 || !std_err.is_finite() {
        // Perfect fit
        return if slope == 0.0 { 1.0 } else { 0.0 };
    }

    let t_stat = slope / std_err;
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => (2.0 * (1.0 - t_dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Result of a trend check on one metric within one load band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric: MetricKind,
    pub load_band: LoadBand,
    /// Change per sample
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub sample_count: usize,
    /// `Stable` unless the trend is significant
    pub direction: TrendDirection,
    pub significant: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl TrendAnalysis {
    /// Significant and pointing the way that means degradation for this metric
    pub fn is_adverse(&self) -> bool {
        self.significant && self.metric.adverse_direction().is_adverse(self.direction)
    }

    pub fn describe(&self) -> String {
        format!(
            "{} showing {} trend in {} load band (R²={:.2})",
            self.metric.label(),
            self.direction,
            self.load_band,
            self.r_squared
        )
    }
}

/// Detect drift in a time-ordered series of readings from a single band.
///
/// Non-finite readings are dropped before counting. Fewer than
/// [`MIN_TREND_POINTS`] usable points yields `InsufficientData`, which
/// callers treat as "skip this cycle".
pub fn analyze_trend(
    metric: MetricKind,
    load_band: LoadBand,
    points: &[(DateTime<Utc>, f64)],
) -> Result<TrendAnalysis, StatsError> {
    let usable: Vec<(DateTime<Utc>, f64)> = points
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();

    if usable.len() < MIN_TREND_POINTS {
        return Err(StatsError::InsufficientData {
            needed: MIN_TREND_POINTS,
            got: usable.len(),
        });
    }

    let values: Vec<f64> = usable.iter().map(|(_, v)| *v).collect();
    let fit = linear_regression(&values).ok_or(StatsError::InsufficientData {
        needed: MIN_TREND_POINTS,
        got: values.len(),
    })?;

    let significant = fit.p_value < SIGNIFICANCE_LEVEL && fit.slope.abs() > MIN_SIGNIFICANT_SLOPE;
    let direction = if significant {
        TrendDirection::from_slope(fit.slope)
    } else {
        TrendDirection::Stable
    };

    Ok(TrendAnalysis {
        metric,
        load_band,
        slope: fit.slope,
        intercept: fit.intercept,
        r_squared: fit.r_squared,
        p_value: fit.p_value,
        sample_count: fit.n,
        direction,
        significant,
        window_start: usable[0].0,
        window_end: usable[usable.len() - 1].0,
    })
}
