//! Alert Classifier
//!
//! Turns one cycle's readings into per-metric alerts:
//!
//! 1. Absolute limits from `[thresholds]` (oil pressure, speed deviation,
//!    coolant, battery, controller)
//! 2. The generic sigma rule against the band baseline
//! 3. INFO alerts for significant trends in a metric's adverse direction
//! 4. Escalation across cycles (see [`EscalationTracker`])
//!
//! The overall status is the maximum severity of the cycle.

mod escalation;
mod thresholds;

pub use escalation::{EscalationTracker, Streak};
pub use thresholds::{sigma_severity, threshold_severity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::Baseline;
use crate::config::ThresholdConfig;
use crate::load_band::LoadBand;
use crate::stats::{deviation_score, TrendAnalysis};
use crate::types::{MetricKind, MetricSample};

// ============================================================================
// Severity
// ============================================================================

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Critical,
    /// Sustained CRITICAL, shutdown recommended
    Error,
}

impl Severity {
    pub const ALL: [Self; 5] = [
        Self::Ok,
        Self::Info,
        Self::Warning,
        Self::Critical,
        Self::Error,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sev| sev.as_str().eq_ignore_ascii_case(s))
    }

    /// One tier up, saturating at ERROR
    pub const fn escalate(self) -> Self {
        match self {
            Self::Ok => Self::Info,
            Self::Info => Self::Warning,
            Self::Warning => Self::Critical,
            Self::Critical | Self::Error => Self::Error,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `None` for alerts that are not about a single metric
    pub metric: Option<MetricKind>,
    pub severity: Severity,
    pub description: String,
    pub load_band: LoadBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of classifying one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleAlerts {
    pub alerts: Vec<Alert>,
    pub overall: Severity,
    pub shutdown_recommended: bool,
}

impl CycleAlerts {
    pub fn is_ok(&self) -> bool {
        self.overall == Severity::Ok
    }

    pub fn for_metric(&self, metric: MetricKind) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(move |a| a.metric == Some(metric))
    }

    /// Short text written with analysis records
    pub fn summary(&self) -> String {
        if self.alerts.is_empty() {
            return "All monitored metrics within limits".to_string();
        }
        self.alerts
            .iter()
            .filter(|a| a.severity >= Severity::Warning)
            .map(|a| format!("[{}] {}", a.severity, a.description))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Inputs for one classification pass
pub struct CycleInput<'a> {
    pub sample: &'a MetricSample,
    pub load_band: LoadBand,
    /// Reference baseline for the band, if one exists
    pub baseline: Option<&'a Baseline>,
    pub trends: &'a [TrendAnalysis],
    /// Engine stopped: only metrics that are meaningful at rest are checked
    pub paused: bool,
    /// First classification of this sample. A repeat is graded against
    /// the existing streaks without extending them.
    pub fresh: bool,
}

/// Stateful classifier; keeps escalation streaks between cycles.
#[derive(Debug, Clone)]
pub struct AlertClassifier {
    thresholds: ThresholdConfig,
    rated_rpm: f64,
    escalation: EscalationTracker,
}

impl AlertClassifier {
    pub fn new(thresholds: ThresholdConfig, rated_rpm: f64) -> Self {
        let escalation = EscalationTracker::new(
            thresholds.escalation_warning_cycles,
            thresholds.escalation_critical_cycles,
        );
        Self {
            thresholds,
            rated_rpm,
            escalation,
        }
    }

    pub const fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub const fn escalation(&self) -> &EscalationTracker {
        &self.escalation
    }

    /// Classify one cycle. Escalation streaks advance only on a fresh sample.
    pub fn classify(&mut self, input: &CycleInput<'_>, now: DateTime<Utc>) -> CycleAlerts {
        let mut alerts = Vec::new();

        for metric in MetricKind::ANALYZED {
            if input.paused && metric.is_load_dependent() {
                continue;
            }
            // Missing readings leave the streaks untouched
            let Some(value) = input.sample.reported(metric) else {
                continue;
            };

            let mut metric_severity = Severity::Ok;
            let mut push = |alert: Alert, severity: &mut Severity| {
                *severity = (*severity).max(alert.severity);
                alerts.push(alert);
            };

            if let Some((severity, description)) =
                threshold_severity(metric, value, &self.thresholds, self.rated_rpm)
            {
                push(
                    Alert {
                        metric: Some(metric),
                        severity,
                        description,
                        load_band: input.load_band,
                        sigma: None,
                        value: Some(value),
                        timestamp: now,
                    },
                    &mut metric_severity,
                );
            }

            if let Some(stats) = input.baseline.and_then(|b| b.stats(metric)) {
                let score = deviation_score(value, stats);
                let severity = sigma_severity(&score, &self.thresholds);
                if severity > Severity::Ok {
                    let description = if score.low_confidence {
                        format!("{}: insufficient baseline confidence", metric.label())
                    } else {
                        format!(
                            "{} {:.1} {} is {:.1}σ from the {} baseline mean {:.1}",
                            metric.label(),
                            value,
                            metric.unit(),
                            score.sigma,
                            input.load_band,
                            stats.mean()
                        )
                    };
                    push(
                        Alert {
                            metric: Some(metric),
                            severity,
                            description,
                            load_band: input.load_band,
                            sigma: (!score.low_confidence).then_some(score.sigma),
                            value: Some(value),
                            timestamp: now,
                        },
                        &mut metric_severity,
                    );
                }
            }

            if let Some(trend) = input
                .trends
                .iter()
                .find(|t| t.metric == metric && t.is_adverse())
            {
                push(
                    Alert {
                        metric: Some(metric),
                        severity: Severity::Info,
                        description: trend.describe(),
                        load_band: input.load_band,
                        sigma: None,
                        value: Some(value),
                        timestamp: now,
                    },
                    &mut metric_severity,
                );
            }

            let escalated = if input.fresh {
                self.escalation.observe(metric, metric_severity)
            } else {
                self.escalation.peek(metric, metric_severity)
            };
            if escalated > metric_severity {
                let streak = self.escalation.streak(metric);
                let description = if escalated == Severity::Error {
                    format!(
                        "{} CRITICAL for {} consecutive cycles, shutdown recommended",
                        metric.label(),
                        streak.critical
                    )
                } else {
                    format!(
                        "{} at WARNING or above for {} consecutive cycles",
                        metric.label(),
                        streak.warning
                    )
                };
                alerts.push(Alert {
                    metric: Some(metric),
                    severity: escalated,
                    description,
                    load_band: input.load_band,
                    sigma: None,
                    value: Some(value),
                    timestamp: now,
                });
            }
        }

        let overall = alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Ok);

        CycleAlerts {
            shutdown_recommended: overall == Severity::Error,
            alerts,
            overall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{MetricStats, PeriodType};
    use crate::stats::analyze_trend;
    use chrono::Duration;

    fn healthy(now: DateTime<Utc>) -> MetricSample {
        MetricSample::new(now)
            .with(MetricKind::EngineSpeed, 1800.0)
            .with(MetricKind::OilPressure, 320.0)
            .with(MetricKind::CoolantTemperature, 82.0)
            .with(MetricKind::BatteryVoltage, 27.0)
            .with(MetricKind::PowerFraction, 50.0)
    }

    fn classifier() -> AlertClassifier {
        AlertClassifier::new(ThresholdConfig::default(), 1800.0)
    }

    fn run(c: &mut AlertClassifier, sample: &MetricSample, baseline: Option<&Baseline>) -> CycleAlerts {
        c.classify(
            &CycleInput {
                sample,
                load_band: LoadBand::Normal,
                baseline,
                trends: &[],
                paused: false,
                fresh: true,
            },
            sample.timestamp,
        )
    }

    #[test]
    fn test_severity_order_and_names() {
        assert!(Severity::Ok < Severity::Info);
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Critical < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "WARNING");
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::Critical.escalate(), Severity::Error);
        assert_eq!(serde_json::to_string(&Severity::Ok).unwrap(), "\"OK\"");
    }

    #[test]
    fn test_healthy_sample_is_ok() {
        let mut c = classifier();
        let result = run(&mut c, &healthy(Utc::now()), None);
        assert!(result.is_ok(), "{:?}", result.alerts);
        assert_eq!(result.summary(), "All monitored metrics within limits");
    }

    #[test]
    fn test_three_and_a_half_sigma_is_critical() {
        let now = Utc::now();
        let mut baseline = Baseline::seed(LoadBand::Normal, PeriodType::Monthly, now);
        baseline
            .metrics
            .insert(MetricKind::CoolantTemperature, MetricStats::from_moments(80.0, 2.0, 200, 10));

        let mut c = classifier();
        let sample = healthy(now).with(MetricKind::CoolantTemperature, 87.0);
        let result = run(&mut c, &sample, Some(&baseline));

        assert_eq!(result.overall, Severity::Critical);
        let alert = result.for_metric(MetricKind::CoolantTemperature).next().unwrap();
        assert!((alert.sigma.unwrap() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_baseline_only_informs() {
        let now = Utc::now();
        let mut baseline = Baseline::seed(LoadBand::Normal, PeriodType::Monthly, now);
        baseline
            .metrics
            .insert(MetricKind::CoolantTemperature, MetricStats::from_moments(80.0, 0.0, 200, 10));

        let mut c = classifier();
        let sample = healthy(now).with(MetricKind::CoolantTemperature, 90.0);
        let result = run(&mut c, &sample, Some(&baseline));

        assert_eq!(result.overall, Severity::Info);
        assert!(result.alerts[0]
            .description
            .contains("insufficient baseline confidence"));
    }

    #[test]
    fn test_low_oil_pressure_limits() {
        let mut c = classifier();
        let now = Utc::now();
        let warn = run(&mut c, &healthy(now).with(MetricKind::OilPressure, 200.0), None);
        assert_eq!(warn.overall, Severity::Warning);

        let mut c = classifier();
        let crit = run(&mut c, &healthy(now).with(MetricKind::OilPressure, 120.0), None);
        assert_eq!(crit.overall, Severity::Critical);
    }

    #[test]
    fn test_zero_reading_is_not_evaluated() {
        let mut c = classifier();
        let result = run(&mut c, &healthy(Utc::now()).with(MetricKind::OilPressure, 0.0), None);
        assert!(result.is_ok());
    }

    #[test]
    fn test_three_warnings_escalate_and_ok_resets() {
        let mut c = classifier();
        let now = Utc::now();
        let low_oil = healthy(now).with(MetricKind::OilPressure, 220.0);

        assert_eq!(run(&mut c, &low_oil, None).overall, Severity::Warning);
        assert_eq!(run(&mut c, &low_oil, None).overall, Severity::Warning);
        let third = run(&mut c, &low_oil, None);
        assert_eq!(third.overall, Severity::Critical);
        assert!(third.alerts.iter().any(|a| a.description.contains("3 consecutive")));

        assert!(run(&mut c, &healthy(now), None).is_ok());
        assert_eq!(c.escalation().streak(MetricKind::OilPressure), Streak::default());
        assert_eq!(run(&mut c, &low_oil, None).overall, Severity::Warning);
    }

    #[test]
    fn test_two_criticals_recommend_shutdown() {
        let mut c = classifier();
        let now = Utc::now();
        let very_low = healthy(now).with(MetricKind::OilPressure, 100.0);

        let first = run(&mut c, &very_low, None);
        assert_eq!(first.overall, Severity::Critical);
        assert!(!first.shutdown_recommended);

        let second = run(&mut c, &very_low, None);
        assert_eq!(second.overall, Severity::Error);
        assert!(second.shutdown_recommended);
    }

    #[test]
    fn test_repeated_sample_does_not_extend_streak() {
        let mut c = classifier();
        let now = Utc::now();
        let very_low = healthy(now).with(MetricKind::OilPressure, 100.0);
        let repeat = |c: &mut AlertClassifier| {
            c.classify(
                &CycleInput {
                    sample: &very_low,
                    load_band: LoadBand::Normal,
                    baseline: None,
                    trends: &[],
                    paused: false,
                    fresh: false,
                },
                now,
            )
        };

        assert_eq!(run(&mut c, &very_low, None).overall, Severity::Critical);
        for _ in 0..3 {
            let again = repeat(&mut c);
            assert_eq!(again.overall, Severity::Critical);
            assert!(!again.shutdown_recommended);
        }
        assert_eq!(c.escalation().streak(MetricKind::OilPressure).critical, 1);
    }

    #[test]
    fn test_paused_checks_only_resting_metrics() {
        let mut c = classifier();
        let now = Utc::now();
        let sample = MetricSample::new(now)
            .with(MetricKind::EngineSpeed, 0.0)
            .with(MetricKind::OilPressure, 5.0)
            .with(MetricKind::BatteryVoltage, 21.0);
        let result = c.classify(
            &CycleInput {
                sample: &sample,
                load_band: LoadBand::Stopped,
                baseline: None,
                trends: &[],
                paused: true,
                fresh: true,
            },
            now,
        );
        assert_eq!(result.overall, Severity::Critical);
        assert_eq!(result.alerts.len(), 1);
        assert_eq!(result.alerts[0].metric, Some(MetricKind::BatteryVoltage));
    }

    #[test]
    fn test_adverse_trend_is_info() {
        let now = Utc::now();
        let points: Vec<_> = (0..20)
            .map(|i| (now - Duration::minutes(20 - i), 330.0 - i as f64 * 2.0))
            .collect();
        let trend = analyze_trend(MetricKind::OilPressure, LoadBand::Normal, &points).unwrap();
        assert!(trend.is_adverse());

        let mut c = classifier();
        let sample = healthy(now);
        let result = c.classify(
            &CycleInput {
                sample: &sample,
                load_band: LoadBand::Normal,
                baseline: None,
                trends: std::slice::from_ref(&trend),
                paused: false,
                fresh: true,
            },
            now,
        );
        assert_eq!(result.overall, Severity::Info);
        assert!(result.alerts[0].description.contains("declining"));
    }
}
