//! Statistical Engine
//!
//! - `analyze_trend`: OLS drift detection per metric per load band, with a
//!   two-sided Student's t test on the slope (statrs)
//! - `deviation_score`: sigma distance from a band baseline
//! - `RunningStats`: Welford accumulator backing incremental baselines

mod deviation;
mod regression;
mod running;

pub use deviation::{deviation_score, DeviationScore};
pub use regression::{
    analyze_trend, linear_regression, Regression, TrendAnalysis, TrendDirection,
    MIN_SIGNIFICANT_SLOPE, MIN_TREND_POINTS, SIGNIFICANCE_LEVEL,
};
pub use running::RunningStats;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// Not enough points yet. Skip and retry next cycle.
    #[error("insufficient data: need {needed} points, have {got}")]
    InsufficientData { needed: usize, got: usize },
}
