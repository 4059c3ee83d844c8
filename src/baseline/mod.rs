//! Load-Band Baselines
//!
//! A baseline is the statistical summary (mean, standard deviation, trend
//! slope) of every analyzed metric within one load band over one time
//! granularity. Baselines are:
//!
//! - computed in bulk by bootstrap or a stale refresh
//! - folded incrementally with each live sample observed in their band
//! - persisted as `powertrain_baselines` records; the newest record per
//!   (band, period) is authoritative, older ones remain for audit
//!
//! ## Confidence ladder
//!
//! | Samples                         | Confidence    |
//! |---------------------------------|---------------|
//! | < max(3, min_samples / 2)       | insufficient  |
//! | < min_samples                   | provisional   |
//! | < 30                            | low           |
//! | < 100                           | medium        |
//! | >= 100                          | high          |
//!
//! Sigma alerts are only raised against `low` or better.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::load_band::LoadBand;
use crate::stats::{linear_regression, RunningStats};
use crate::store::{Measurement, MeasurementRecord};
use crate::types::{MetricKind, MetricSample};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Absolute floor for a provisional baseline
pub const PROVISIONAL_FLOOR: u64 = 3;

const MEDIUM_CONFIDENCE_SAMPLES: u64 = 30;
const HIGH_CONFIDENCE_SAMPLES: u64 = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BaselineError {
    #[error("baseline record is missing tag: {0}")]
    MissingTag(&'static str),

    #[error("baseline record has invalid {0}: {1}")]
    InvalidTag(&'static str, String),

    #[error("record belongs to {0}, not baselines")]
    WrongMeasurement(Measurement),
}

// ============================================================================
// Period Type
// ============================================================================

/// Time granularity a baseline summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub const ALL: [Self; 4] = [Self::Hourly, Self::Daily, Self::Weekly, Self::Monthly];

    /// Preference when picking the baseline to judge a reading against:
    /// the longest history first.
    pub const REFERENCE_ORDER: [Self; 4] = [Self::Monthly, Self::Weekly, Self::Daily, Self::Hourly];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// How far back from "now" samples are drawn for this period
    pub fn lookback(self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
        }
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Confidence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineConfidence {
    Insufficient,
    Provisional,
    Low,
    Medium,
    High,
}

impl BaselineConfidence {
    pub fn from_count(count: u64, min_samples: u64) -> Self {
        let floor = PROVISIONAL_FLOOR.max(min_samples / 2);
        if count < floor {
            Self::Insufficient
        } else if count < min_samples {
            Self::Provisional
        } else if count < MEDIUM_CONFIDENCE_SAMPLES {
            Self::Low
        } else if count < HIGH_CONFIDENCE_SAMPLES {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insufficient => "insufficient",
            Self::Provisional => "provisional",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Insufficient,
            Self::Provisional,
            Self::Low,
            Self::Medium,
            Self::High,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
    }
}

// ============================================================================
// Per-metric statistics
// ============================================================================

/// Baseline statistics for a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub running: RunningStats,
    /// Change per sample over the data the baseline was computed from
    pub trend_slope: f64,
    pub confidence: BaselineConfidence,
}

impl MetricStats {
    pub fn empty() -> Self {
        Self {
            running: RunningStats::new(),
            trend_slope: 0.0,
            confidence: BaselineConfidence::Insufficient,
        }
    }

    /// Rebuild from stored moments, grading confidence against the same
    /// `min_samples` live folding uses.
    pub fn from_moments(mean: f64, std_dev: f64, count: u64, min_samples: u64) -> Self {
        Self {
            running: RunningStats::from_moments(mean, std_dev, count),
            trend_slope: 0.0,
            confidence: BaselineConfidence::from_count(count, min_samples),
        }
    }

    /// Summarize a time-ordered series. `None` below the provisional floor.
    pub fn from_values(values: &[f64], min_samples: u64) -> Option<Self> {
        let running = RunningStats::from_values(values);
        let confidence = BaselineConfidence::from_count(running.count, min_samples);
        if confidence == BaselineConfidence::Insufficient {
            return None;
        }
        Some(Self {
            running,
            trend_slope: linear_regression(values).map_or(0.0, |fit| fit.slope),
            confidence,
        })
    }

    pub const fn mean(&self) -> f64 {
        self.running.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.running.std_dev()
    }

    pub const fn sample_count(&self) -> u64 {
        self.running.count
    }

    /// Welford update with one live reading
    pub fn fold(&mut self, value: f64, min_samples: u64) {
        if self.running.push(value) {
            self.confidence = BaselineConfidence::from_count(self.running.count, min_samples);
        }
    }
}

// ============================================================================
// Baseline
// ============================================================================

pub type BaselineKey = (LoadBand, PeriodType);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub load_band: LoadBand,
    pub period_type: PeriodType,
    pub metrics: BTreeMap<MetricKind, MetricStats>,
    pub sample_count: u64,
    pub confidence: BaselineConfidence,
    /// When the baseline was last computed in bulk; drives staleness
    pub computed_at: DateTime<Utc>,
    /// When the baseline last changed, including incremental folds
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// Empty baseline to be filled by live folding.
    pub fn seed(load_band: LoadBand, period_type: PeriodType, now: DateTime<Utc>) -> Self {
        Self {
            load_band,
            period_type,
            metrics: BTreeMap::new(),
            sample_count: 0,
            confidence: BaselineConfidence::Insufficient,
            computed_at: now,
            updated_at: now,
        }
    }

    /// Compute a baseline from samples that all belong to `load_band`.
    ///
    /// Returns `None` when no metric reaches the provisional floor.
    pub fn compute(
        load_band: LoadBand,
        period_type: PeriodType,
        samples: &[&MetricSample],
        min_samples: u64,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if load_band.is_stopped() {
            return None;
        }

        let mut metrics = BTreeMap::new();
        for metric in MetricKind::ANALYZED {
            let values: Vec<f64> = samples.iter().filter_map(|s| s.reported(metric)).collect();
            if let Some(stats) = MetricStats::from_values(&values, min_samples) {
                metrics.insert(metric, stats);
            }
        }
        if metrics.is_empty() {
            return None;
        }

        let sample_count = samples.len() as u64;
        Some(Self {
            load_band,
            period_type,
            metrics,
            sample_count,
            confidence: BaselineConfidence::from_count(sample_count, min_samples),
            computed_at: now,
            updated_at: now,
        })
    }

    pub const fn key(&self) -> BaselineKey {
        (self.load_band, self.period_type)
    }

    pub fn stats(&self, metric: MetricKind) -> Option<&MetricStats> {
        self.metrics.get(&metric)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.computed_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Fold one live sample into every metric it reports.
    pub fn fold_sample(&mut self, sample: &MetricSample, min_samples: u64, now: DateTime<Utc>) {
        let mut folded = false;
        for metric in MetricKind::ANALYZED {
            if let Some(value) = sample.reported(metric) {
                self.metrics
                    .entry(metric)
                    .or_insert_with(MetricStats::empty)
                    .fold(value, min_samples);
                folded = true;
            }
        }
        if folded {
            self.sample_count += 1;
            self.confidence = BaselineConfidence::from_count(self.sample_count, min_samples);
            self.updated_at = now;
        }
    }

    // ------------------------------------------------------------------------
    // Store records
    // ------------------------------------------------------------------------

    pub fn to_record(&self) -> MeasurementRecord {
        let mut record = MeasurementRecord::new(Measurement::Baselines, self.updated_at)
            .tag("load_band", self.load_band.as_str())
            .tag("period_type", self.period_type.as_str())
            .field("sample_count", self.sample_count)
            .field("confidence", self.confidence.as_str())
            .field("computed_at", self.computed_at.to_rfc3339());

        for (metric, stats) in &self.metrics {
            let name = metric.field_name();
            record = record
                .field(format!("avg_{name}"), stats.mean())
                .field(format!("stddev_{name}"), stats.std_dev())
                .field(format!("count_{name}"), stats.sample_count())
                .field(format!("trend_slope_{name}"), stats.trend_slope);
        }
        // Legacy single-slope field, read by dashboards as the oil pressure trend
        if let Some(oil) = self.metrics.get(&MetricKind::OilPressure) {
            record = record.field("trend_slope", oil.trend_slope);
        }
        record
    }

    /// Restore a baseline written by [`Baseline::to_record`]. Confidence is
    /// re-graded from the stored counts with `min_samples`.
    pub fn from_record(record: &MeasurementRecord, min_samples: u64) -> Result<Self, BaselineError> {
        if record.measurement != Measurement::Baselines {
            return Err(BaselineError::WrongMeasurement(record.measurement));
        }
        let band_tag = record
            .tag_value("load_band")
            .ok_or(BaselineError::MissingTag("load_band"))?;
        let load_band = LoadBand::parse(band_tag)
            .ok_or_else(|| BaselineError::InvalidTag("load_band", band_tag.to_string()))?;
        let period_tag = record
            .tag_value("period_type")
            .ok_or(BaselineError::MissingTag("period_type"))?;
        let period_type = PeriodType::parse(period_tag)
            .ok_or_else(|| BaselineError::InvalidTag("period_type", period_tag.to_string()))?;

        let sample_count = record
            .fields
            .get("sample_count")
            .and_then(|v| v.as_i64())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0);
        let confidence = BaselineConfidence::from_count(sample_count, min_samples);
        let computed_at = record
            .field_str("computed_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or(record.timestamp, |t| t.with_timezone(&Utc));

        let mut metrics = BTreeMap::new();
        for metric in MetricKind::ANALYZED {
            let name = metric.field_name();
            let Some(mean) = record.field_f64(&format!("avg_{name}")) else {
                continue;
            };
            let std_dev = record.field_f64(&format!("stddev_{name}")).unwrap_or(0.0);
            let count = record
                .fields
                .get(&format!("count_{name}"))
                .and_then(|v| v.as_i64())
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(sample_count);
            let mut stats = MetricStats::from_moments(mean, std_dev, count, min_samples);
            stats.trend_slope = record
                .field_f64(&format!("trend_slope_{name}"))
                .unwrap_or(0.0);
            metrics.insert(metric, stats);
        }

        Ok(Self {
            load_band,
            period_type,
            metrics,
            sample_count,
            confidence,
            computed_at,
            updated_at: record.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize, oil_start: f64) -> Vec<MetricSample> {
        let start = Utc::now() - Duration::hours(1);
        (0..n)
            .map(|i| {
                MetricSample::new(start + Duration::minutes(i as i64))
                    .with(MetricKind::EngineSpeed, 1800.0 + (i % 3) as f64)
                    .with(MetricKind::OilPressure, oil_start + i as f64)
                    .with(MetricKind::PowerFraction, 50.0)
                    .with(MetricKind::FuelRate, 0.0)
            })
            .collect()
    }

    #[test]
    fn test_confidence_ladder() {
        use BaselineConfidence::*;
        assert_eq!(BaselineConfidence::from_count(2, 10), Insufficient);
        assert_eq!(BaselineConfidence::from_count(4, 10), Insufficient);
        assert_eq!(BaselineConfidence::from_count(5, 10), Provisional);
        assert_eq!(BaselineConfidence::from_count(10, 10), Low);
        assert_eq!(BaselineConfidence::from_count(30, 10), Medium);
        assert_eq!(BaselineConfidence::from_count(100, 10), High);
        // floor never drops below 3
        assert_eq!(BaselineConfidence::from_count(3, 2), Low);
        assert_eq!(BaselineConfidence::from_count(2, 2), Insufficient);
    }

    #[test]
    fn test_compute_skips_unreported_metrics() {
        let data = samples(20, 300.0);
        let refs: Vec<&MetricSample> = data.iter().collect();
        let baseline =
            Baseline::compute(LoadBand::Normal, PeriodType::Daily, &refs, 10, Utc::now()).unwrap();

        assert!(baseline.stats(MetricKind::OilPressure).is_some());
        assert!(baseline.stats(MetricKind::EngineSpeed).is_some());
        // zero readings are "not reporting"
        assert!(baseline.stats(MetricKind::FuelRate).is_none());

        let oil = baseline.stats(MetricKind::OilPressure).unwrap();
        assert!((oil.mean() - 309.5).abs() < 1e-9);
        assert!((oil.trend_slope - 1.0).abs() < 1e-9);
        assert_eq!(baseline.confidence, BaselineConfidence::Low);
    }

    #[test]
    fn test_compute_requires_floor() {
        let data = samples(2, 300.0);
        let refs: Vec<&MetricSample> = data.iter().collect();
        assert!(Baseline::compute(LoadBand::Normal, PeriodType::Hourly, &refs, 10, Utc::now()).is_none());
    }

    #[test]
    fn test_stopped_band_never_baselined() {
        let data = samples(50, 300.0);
        let refs: Vec<&MetricSample> = data.iter().collect();
        assert!(Baseline::compute(LoadBand::Stopped, PeriodType::Daily, &refs, 10, Utc::now()).is_none());
    }

    #[test]
    fn test_fold_updates_mean_and_count() {
        let now = Utc::now();
        let mut baseline = Baseline::seed(LoadBand::Heavy, PeriodType::Hourly, now);
        for v in [300.0, 310.0, 320.0] {
            let sample = MetricSample::new(now).with(MetricKind::OilPressure, v);
            baseline.fold_sample(&sample, 10, now);
        }
        let oil = baseline.stats(MetricKind::OilPressure).unwrap();
        assert_eq!(baseline.sample_count, 3);
        assert!((oil.mean() - 310.0).abs() < 1e-9);
        assert!((oil.std_dev() - 10.0).abs() < 1e-9);
        assert_eq!(baseline.confidence, BaselineConfidence::Insufficient);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut baseline = Baseline::seed(LoadBand::Light, PeriodType::Weekly, now);
        baseline.computed_at = now - Duration::days(8);
        assert!(baseline.is_stale(now, Duration::days(7)));
        baseline.computed_at = now - Duration::days(1);
        assert!(!baseline.is_stale(now, Duration::days(7)));
    }

    #[test]
    fn test_record_round_trip_preserves_statistics() {
        let data = samples(40, 280.0);
        let refs: Vec<&MetricSample> = data.iter().collect();
        let baseline =
            Baseline::compute(LoadBand::Moderate, PeriodType::Weekly, &refs, 10, Utc::now()).unwrap();

        let record = baseline.to_record();
        assert_eq!(record.tag_value("load_band"), Some("MODERATE"));
        assert_eq!(record.tag_value("period_type"), Some("weekly"));
        assert!(record.field_f64("avg_oil_pressure").is_some());
        assert!(record.field_f64("stddev_oil_pressure").is_some());
        let oil_slope = baseline.stats(MetricKind::OilPressure).unwrap().trend_slope;
        assert_eq!(record.field_f64("trend_slope"), Some(oil_slope));
        assert_eq!(record.field_f64("trend_slope_oil_pressure"), Some(oil_slope));

        let restored = Baseline::from_record(&record, 10).unwrap();
        let a = baseline.stats(MetricKind::OilPressure).unwrap();
        let b = restored.stats(MetricKind::OilPressure).unwrap();
        assert!((a.mean() - b.mean()).abs() < 1e-9);
        assert!((a.std_dev() - b.std_dev()).abs() < 1e-9);
        assert_eq!(restored.sample_count, 40);
        assert_eq!(restored.confidence, BaselineConfidence::Medium);
    }

    #[test]
    fn test_restore_grades_confidence_with_configured_minimum() {
        let data = samples(30, 300.0);
        let refs: Vec<&MetricSample> = data.iter().collect();
        let live =
            Baseline::compute(LoadBand::Normal, PeriodType::Daily, &refs, 50, Utc::now()).unwrap();
        assert_eq!(live.confidence, BaselineConfidence::Provisional);
        assert_eq!(
            live.stats(MetricKind::OilPressure).unwrap().confidence,
            BaselineConfidence::Provisional
        );

        let restored = Baseline::from_record(&live.to_record(), 50).unwrap();
        assert_eq!(restored.confidence, BaselineConfidence::Provisional);
        assert_eq!(
            restored.stats(MetricKind::OilPressure).unwrap().confidence,
            BaselineConfidence::Provisional
        );
    }

    #[test]
    fn test_baseline_without_oil_has_no_legacy_slope() {
        let now = Utc::now();
        let mut baseline = Baseline::seed(LoadBand::Light, PeriodType::Hourly, now);
        baseline.fold_sample(&MetricSample::new(now).with(MetricKind::CoolantTemperature, 80.0), 10, now);
        assert!(baseline.to_record().field_f64("trend_slope").is_none());
    }

    #[test]
    fn test_from_record_rejects_other_families() {
        let record = MeasurementRecord::new(Measurement::Insights, Utc::now());
        assert_eq!(
            Baseline::from_record(&record, 10),
            Err(BaselineError::WrongMeasurement(Measurement::Insights))
        );
    }
}
