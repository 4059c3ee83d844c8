//! Powertrain metrics and raw telemetry samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats::TrendDirection;

// ============================================================================
// Metric Kinds
// ============================================================================

/// Every powertrain reading the analyst understands.
///
/// The serialized name doubles as the field name in the metric store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "engine_speed")]
    EngineSpeed,
    #[serde(rename = "oil_pressure")]
    OilPressure,
    #[serde(rename = "coolant_temp")]
    CoolantTemperature,
    #[serde(rename = "fuel_pressure")]
    FuelPressure,
    #[serde(rename = "fuel_temp")]
    FuelTemperature,
    #[serde(rename = "fuel_rate")]
    FuelRate,
    #[serde(rename = "intake_air_temp")]
    IntakeAirTemperature,
    #[serde(rename = "intake_air_pressure")]
    IntakeAirPressure,
    #[serde(rename = "power_fraction")]
    PowerFraction,
    #[serde(rename = "battery_voltage")]
    BatteryVoltage,
    #[serde(rename = "controller_temp")]
    ControllerTemperature,
}

/// Which direction of drift is bad news for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdverseDirection {
    /// Rising values indicate wear or overheating
    Rising,
    /// Falling values indicate loss of pressure or charge
    Falling,
    /// Any drift away from the set point is adverse
    Either,
    /// Drift carries no health meaning on its own
    Neutral,
}

impl AdverseDirection {
    /// Whether a trend in `direction` counts as degradation.
    pub fn is_adverse(self, direction: TrendDirection) -> bool {
        match (self, direction) {
            (_, TrendDirection::Stable) | (Self::Neutral, _) => false,
            (Self::Either, _) => true,
            (Self::Rising, TrendDirection::Increasing) => true,
            (Self::Falling, TrendDirection::Declining) => true,
            _ => false,
        }
    }
}

impl MetricKind {
    pub const ALL: [Self; 11] = [
        Self::EngineSpeed,
        Self::OilPressure,
        Self::CoolantTemperature,
        Self::FuelPressure,
        Self::FuelTemperature,
        Self::FuelRate,
        Self::IntakeAirTemperature,
        Self::IntakeAirPressure,
        Self::PowerFraction,
        Self::BatteryVoltage,
        Self::ControllerTemperature,
    ];

    /// Metrics that get baselines and trend checks. Power fraction is
    /// excluded because it defines the load band itself.
    pub const ANALYZED: [Self; 10] = [
        Self::EngineSpeed,
        Self::OilPressure,
        Self::CoolantTemperature,
        Self::FuelPressure,
        Self::FuelTemperature,
        Self::FuelRate,
        Self::IntakeAirTemperature,
        Self::IntakeAirPressure,
        Self::BatteryVoltage,
        Self::ControllerTemperature,
    ];

    /// Store field name
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::EngineSpeed => "engine_speed",
            Self::OilPressure => "oil_pressure",
            Self::CoolantTemperature => "coolant_temp",
            Self::FuelPressure => "fuel_pressure",
            Self::FuelTemperature => "fuel_temp",
            Self::FuelRate => "fuel_rate",
            Self::IntakeAirTemperature => "intake_air_temp",
            Self::IntakeAirPressure => "intake_air_pressure",
            Self::PowerFraction => "power_fraction",
            Self::BatteryVoltage => "battery_voltage",
            Self::ControllerTemperature => "controller_temp",
        }
    }

    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.field_name() == name)
    }

    /// Human-readable label used in alert and insight text
    pub const fn label(self) -> &'static str {
        match self {
            Self::EngineSpeed => "Engine Speed",
            Self::OilPressure => "Oil Pressure",
            Self::CoolantTemperature => "Coolant Temperature",
            Self::FuelPressure => "Fuel Pressure",
            Self::FuelTemperature => "Fuel Temperature",
            Self::FuelRate => "Fuel Rate",
            Self::IntakeAirTemperature => "Intake Air Temperature",
            Self::IntakeAirPressure => "Intake Air Pressure",
            Self::PowerFraction => "Generator Power",
            Self::BatteryVoltage => "Battery Voltage",
            Self::ControllerTemperature => "Controller Temperature",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::EngineSpeed => "RPM",
            Self::OilPressure | Self::FuelPressure | Self::IntakeAirPressure => "kPa",
            Self::CoolantTemperature
            | Self::FuelTemperature
            | Self::IntakeAirTemperature
            | Self::ControllerTemperature => "°C",
            Self::FuelRate => "l/hr",
            Self::PowerFraction => "%",
            Self::BatteryVoltage => "V",
        }
    }

    pub const fn adverse_direction(self) -> AdverseDirection {
        match self {
            Self::CoolantTemperature
            | Self::FuelTemperature
            | Self::FuelRate
            | Self::IntakeAirTemperature
            | Self::ControllerTemperature => AdverseDirection::Rising,
            Self::OilPressure
            | Self::FuelPressure
            | Self::BatteryVoltage
            | Self::IntakeAirPressure => AdverseDirection::Falling,
            Self::EngineSpeed => AdverseDirection::Either,
            Self::PowerFraction => AdverseDirection::Neutral,
        }
    }

    /// Metrics whose readings only mean something while the engine turns.
    /// The rest are still evaluated while the analyst is paused.
    pub const fn is_load_dependent(self) -> bool {
        !matches!(self, Self::BatteryVoltage | Self::ControllerTemperature)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

// ============================================================================
// Metric Sample
// ============================================================================

/// One poll of the generator controller.
///
/// Readings that the controller did not report are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub readings: BTreeMap<MetricKind, f64>,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: BTreeMap::new(),
        }
    }

    /// Builder-style setter, mostly for ingest code and tests.
    #[must_use]
    pub fn with(mut self, metric: MetricKind, value: f64) -> Self {
        self.readings.insert(metric, value);
        self
    }

    pub fn get(&self, metric: MetricKind) -> Option<f64> {
        self.readings.get(&metric).copied()
    }

    /// A reading that is present, finite and above zero. Zero means the
    /// sensor is not reporting on this controller.
    pub fn reported(&self, metric: MetricKind) -> Option<f64> {
        self.get(metric).filter(|v| v.is_finite() && *v > 0.0)
    }
}
