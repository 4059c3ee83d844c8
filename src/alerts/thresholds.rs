//! Absolute limits and the sigma rule

use super::Severity;
use crate::config::ThresholdConfig;
use crate::stats::DeviationScore;
use crate::types::MetricKind;

/// Grade a reading against the absolute limit table.
///
/// Returns `None` when the reading is within limits or the metric has no
/// absolute limit. Callers pass only reported (non-zero) readings.
pub fn threshold_severity(
    metric: MetricKind,
    value: f64,
    t: &ThresholdConfig,
    rated_rpm: f64,
) -> Option<(Severity, String)> {
    let label = metric.label();
    let unit = metric.unit();

    let below = |warning: f64, critical: f64| {
        if value < critical {
            Some((
                Severity::Critical,
                format!("{label} {value:.1} {unit} below critical limit {critical:.1} {unit}"),
            ))
        } else if value < warning {
            Some((
                Severity::Warning,
                format!("{label} {value:.1} {unit} below warning limit {warning:.1} {unit}"),
            ))
        } else {
            None
        }
    };

    let above = |warning: f64, critical: f64| {
        if value > critical {
            Some((
                Severity::Critical,
                format!("{label} {value:.1} {unit} above critical limit {critical:.1} {unit}"),
            ))
        } else if value > warning {
            Some((
                Severity::Warning,
                format!("{label} {value:.1} {unit} above warning limit {warning:.1} {unit}"),
            ))
        } else {
            None
        }
    };

    match metric {
        MetricKind::OilPressure => below(t.oil_pressure_warning_kpa, t.oil_pressure_critical_kpa),
        MetricKind::BatteryVoltage => below(t.battery_warning_v, t.battery_critical_v),
        MetricKind::CoolantTemperature => above(t.coolant_warning_c, t.coolant_critical_c),
        MetricKind::ControllerTemperature => {
            above(t.controller_warning_c, t.controller_critical_c)
        }
        MetricKind::EngineSpeed => {
            let deviation = (value - rated_rpm).abs();
            let severity = if deviation >= t.rpm_deviation_critical {
                Severity::Critical
            } else if deviation >= t.rpm_deviation_warning {
                Severity::Warning
            } else {
                return None;
            };
            Some((
                severity,
                format!("Engine speed {value:.0} RPM is {deviation:.0} RPM from rated {rated_rpm:.0} RPM"),
            ))
        }
        _ => None,
    }
}

/// Grade a sigma score. Low-confidence scores never go above INFO.
pub fn sigma_severity(score: &DeviationScore, t: &ThresholdConfig) -> Severity {
    if score.low_confidence {
        Severity::Info
    } else if score.sigma >= t.critical_sigma {
        Severity::Critical
    } else if score.sigma >= t.warning_sigma {
        Severity::Warning
    } else {
        Severity::Ok
    }
}
