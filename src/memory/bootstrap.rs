//! Bootstrap analytics over a historical window
//!
//! Pure functions over samples; the manager does the I/O.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alerts::{Alert, Severity};
use crate::baseline::{Baseline, PeriodType};
use crate::load_band::{LoadBand, LoadBandClassifier, STOPPED_RPM_MAX};
use crate::stats::{analyze_trend, RunningStats, MIN_TREND_POINTS};
use crate::types::{Insight, InsightConfidence, KnowledgeType, MetricKind, MetricSample};

/// Oil pressure below this is a historical WARNING event (kPa)
pub const EVENT_LOW_OIL_KPA: f64 = 200.0;

/// Drop below the trailing mean that counts as a sudden loss (kPa)
pub const EVENT_OIL_DROP_KPA: f64 = 50.0;

/// Trailing window for the sudden-drop check (samples)
pub const EVENT_ROLLING_WINDOW: usize = 20;

/// Speed deviation from rated that counts as an event (RPM)
pub const EVENT_RPM_DEVIATION: f64 = 100.0;

/// Events kept in memory, newest first
pub const MAX_EVENTS: usize = 50;

/// Hourly or daily means varying more than this form a pattern
const PATTERN_MIN_STD: f64 = 5.0;

/// R² above which a bootstrap trend is high confidence
const HIGH_CONFIDENCE_R2: f64 = 0.7;

/// Something notable found while scanning history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub severity: Severity,
    pub metric: MetricKind,
    pub value: f64,
    pub description: String,
    pub load_band: LoadBand,
    pub timestamp: DateTime<Utc>,
}

impl HistoricalEvent {
    /// A live sigma anomaly at WARNING or above, stamped with the time of
    /// the sample that raised it.
    pub fn from_alert(alert: &Alert, sample_at: DateTime<Utc>) -> Option<Self> {
        if alert.sigma.is_none() || alert.severity < Severity::Warning {
            return None;
        }
        Some(Self {
            severity: alert.severity,
            metric: alert.metric?,
            value: alert.value?,
            description: alert.description.clone(),
            load_band: alert.load_band,
            timestamp: sample_at,
        })
    }
}

// ============================================================================
// Period buckets
// ============================================================================

/// Start of the UTC bucket containing `ts`: the hour, the calendar day,
/// the ISO week (Monday) or the calendar month.
pub fn bucket_start(period: PeriodType, ts: DateTime<Utc>) -> DateTime<Utc> {
    let date = ts.date_naive();
    let midnight = |d: chrono::NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));
    match period {
        PeriodType::Hourly => {
            midnight(date) + Duration::hours(i64::from(ts.hour()))
        }
        PeriodType::Daily => midnight(date),
        PeriodType::Weekly => {
            midnight(date) - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
        PeriodType::Monthly => midnight(date.with_day(1).unwrap_or(date)),
    }
}

/// One baseline per (band, period) from the most recent bucket of each
/// period. STOPPED samples never contribute.
pub fn compute_period_baselines(
    samples: &[MetricSample],
    classifier: &LoadBandClassifier,
    min_samples: u64,
    now: DateTime<Utc>,
) -> Vec<Baseline> {
    let Some(latest) = samples.iter().map(|s| s.timestamp).max() else {
        return Vec::new();
    };

    let banded: Vec<(LoadBand, &MetricSample)> = samples
        .iter()
        .map(|s| (classifier.classify_sample(s), s))
        .filter(|(band, _)| !band.is_stopped())
        .collect();

    let mut baselines = Vec::new();
    for period in PeriodType::ALL {
        let start = bucket_start(period, latest);
        let mut by_band: BTreeMap<LoadBand, Vec<&MetricSample>> = BTreeMap::new();
        for (band, sample) in &banded {
            if sample.timestamp >= start {
                by_band.entry(*band).or_default().push(sample);
            }
        }
        for (band, group) in by_band {
            if let Some(baseline) = Baseline::compute(band, period, &group, min_samples, now) {
                baselines.push(baseline);
            }
        }
    }
    baselines
}

// ============================================================================
// Degradation trends
// ============================================================================

/// Significant per-band trends over the whole window as `trend` insights.
pub fn trend_insights(
    samples: &[MetricSample],
    classifier: &LoadBandClassifier,
    now: DateTime<Utc>,
) -> Vec<Insight> {
    let mut by_band: BTreeMap<LoadBand, Vec<&MetricSample>> = BTreeMap::new();
    for sample in samples {
        let band = classifier.classify_sample(sample);
        if !band.is_stopped() {
            by_band.entry(band).or_default().push(sample);
        }
    }

    let mut insights = Vec::new();
    for (band, group) in by_band {
        for metric in MetricKind::ANALYZED {
            let points: Vec<(DateTime<Utc>, f64)> = group
                .iter()
                .filter_map(|s| s.reported(metric).map(|v| (s.timestamp, v)))
                .collect();
            if points.len() <= MIN_TREND_POINTS {
                continue;
            }
            // Too few points after filtering is expected here
            let Ok(trend) = analyze_trend(metric, band, &points) else {
                continue;
            };
            if !trend.significant {
                continue;
            }
            let confidence = if trend.r_squared > HIGH_CONFIDENCE_R2 {
                InsightConfidence::High
            } else {
                InsightConfidence::Medium
            };
            insights.push(
                Insight::statistical(KnowledgeType::Trend, trend.describe(), confidence, now)
                    .in_band(band)
                    .supported_by(metric, trend.slope),
            );
        }
    }
    insights
}

// ============================================================================
// Seasonal patterns
// ============================================================================

/// Hour-of-day oil pressure and day-of-week load patterns.
pub fn seasonal_insights(
    samples: &[MetricSample],
    classifier: &LoadBandClassifier,
    now: DateTime<Utc>,
) -> Vec<Insight> {
    let mut insights = Vec::new();

    let mut hourly: BTreeMap<u32, RunningStats> = BTreeMap::new();
    for sample in samples {
        if let Some(oil) = sample.reported(MetricKind::OilPressure) {
            hourly.entry(sample.timestamp.hour()).or_default().push(oil);
        }
    }
    if let Some((spread, peak, low)) = spread_of_means(&hourly) {
        if spread > PATTERN_MIN_STD {
            insights.push(
                Insight::statistical(
                    KnowledgeType::Pattern,
                    format!(
                        "Hourly oil pressure pattern: peak at {peak:02}:00 UTC, low at {low:02}:00 UTC (variation {spread:.1} kPa)"
                    ),
                    InsightConfidence::Medium,
                    now,
                )
                .supported_by(MetricKind::OilPressure, spread),
            );
        }
    }

    let mut daily: BTreeMap<u32, RunningStats> = BTreeMap::new();
    for sample in samples {
        let power = classifier.power_fraction(sample);
        if power.is_finite() {
            daily
                .entry(sample.timestamp.weekday().num_days_from_monday())
                .or_default()
                .push(power);
        }
    }
    if let Some((spread, _, _)) = spread_of_means(&daily) {
        if spread > PATTERN_MIN_STD {
            let weekend = Weekday::Sat.num_days_from_monday();
            let weekday_avg = mean_of(daily.range(..weekend).map(|(_, s)| s.mean));
            let weekend_avg = mean_of(daily.range(weekend..).map(|(_, s)| s.mean));
            insights.push(
                Insight::statistical(
                    KnowledgeType::Pattern,
                    format!(
                        "Day-of-week load pattern: weekday average {weekday_avg:.1}%, weekend average {weekend_avg:.1}% (variation {spread:.1}%)"
                    ),
                    InsightConfidence::Medium,
                    now,
                )
                .supported_by(MetricKind::PowerFraction, spread),
            );
        }
    }

    insights
}

/// Standard deviation of the group means plus the keys of the highest and
/// lowest mean. `None` with fewer than two groups.
fn spread_of_means(groups: &BTreeMap<u32, RunningStats>) -> Option<(f64, u32, u32)> {
    if groups.len() < 2 {
        return None;
    }
    let means: Vec<f64> = groups.values().map(|s| s.mean).collect();
    let spread = RunningStats::from_values(&means).std_dev();

    // First key wins on ties
    let mut peak: Option<(u32, f64)> = None;
    let mut low: Option<(u32, f64)> = None;
    for (key, stats) in groups {
        if peak.map_or(true, |(_, m)| stats.mean > m) {
            peak = Some((*key, stats.mean));
        }
        if low.map_or(true, |(_, m)| stats.mean < m) {
            low = Some((*key, stats.mean));
        }
    }
    let (peak, _) = peak?;
    let (low, _) = low?;
    Some((spread, peak, low))
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    RunningStats::from_values(&values.collect::<Vec<_>>()).mean
}

// ============================================================================
// Historical events
// ============================================================================

/// Scan time-ordered samples for low or collapsing oil pressure and speed
/// excursions. Returns at most [`MAX_EVENTS`], newest first.
pub fn historical_events(
    samples: &[MetricSample],
    classifier: &LoadBandClassifier,
    rated_rpm: f64,
) -> Vec<HistoricalEvent> {
    let mut events = Vec::new();

    for i in EVENT_ROLLING_WINDOW..samples.len() {
        let current = &samples[i];
        let band = classifier.classify_sample(current);
        if band.is_stopped() {
            continue;
        }

        if let Some(oil) = current.reported(MetricKind::OilPressure) {
            if oil < EVENT_LOW_OIL_KPA {
                events.push(HistoricalEvent {
                    severity: Severity::Warning,
                    metric: MetricKind::OilPressure,
                    value: oil,
                    description: format!("Low oil pressure detected: {oil:.1} kPa"),
                    load_band: band,
                    timestamp: current.timestamp,
                });
            }

            let trailing: Vec<f64> = samples[i - EVENT_ROLLING_WINDOW..i]
                .iter()
                .filter_map(|s| s.reported(MetricKind::OilPressure))
                .collect();
            if !trailing.is_empty() {
                let recent_avg = RunningStats::from_values(&trailing).mean;
                if recent_avg - oil > EVENT_OIL_DROP_KPA {
                    events.push(HistoricalEvent {
                        severity: Severity::Critical,
                        metric: MetricKind::OilPressure,
                        value: oil,
                        description: format!(
                            "Sudden oil pressure drop: {recent_avg:.1} to {oil:.1} kPa"
                        ),
                        load_band: band,
                        timestamp: current.timestamp,
                    });
                }
            }
        }

        if let Some(rpm) = current.reported(MetricKind::EngineSpeed) {
            let deviation = (rpm - rated_rpm).abs();
            if rpm >= STOPPED_RPM_MAX && deviation > EVENT_RPM_DEVIATION {
                events.push(HistoricalEvent {
                    severity: Severity::Warning,
                    metric: MetricKind::EngineSpeed,
                    value: rpm,
                    description: format!("RPM deviation: {deviation:.1} RPM from rated"),
                    load_band: band,
                    timestamp: current.timestamp,
                });
            }
        }
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(MAX_EVENTS);
    events
}
