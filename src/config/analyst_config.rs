//! Analyst Configuration - every tunable as a typed TOML value
//!
//! Each section implements `Default` from `config::defaults`, so a missing
//! file or a partial file always yields a complete, validated config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::*;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "ANALYST_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "analyst_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one generator deployment.
///
/// Load with `AnalystConfig::load()` which searches:
/// 1. `$ANALYST_CONFIG` env var
/// 2. `./analyst_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalystConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl AnalystConfig {
    /// Load configuration using the standard search order, falling back
    /// to defaults when nothing loads cleanly.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), generator = %config.generator.name, "Loaded config from ANALYST_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from ANALYST_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "ANALYST_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(generator = %config.generator.name, "Loaded config from ./analyst_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./analyst_config.toml, using defaults");
                }
            }
        }

        info!("No analyst_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate everything, collecting all problems instead of stopping at
    /// the first.
    ///
    /// Rules:
    /// - "Above" limits: critical >= warning
    /// - "Below" limits: critical <= warning
    /// - Interval within 1..=30 minutes
    /// - Timeouts, counts and ratings strictly positive
    /// - Raw sample retention covers the bootstrap window
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        let mut errors: Vec<String> = Vec::new();

        Self::check_escalation(
            t.rpm_deviation_warning,
            t.rpm_deviation_critical,
            "thresholds.rpm_deviation",
            &mut errors,
        );
        Self::check_escalation(
            t.coolant_warning_c,
            t.coolant_critical_c,
            "thresholds.coolant",
            &mut errors,
        );
        Self::check_escalation(
            t.controller_warning_c,
            t.controller_critical_c,
            "thresholds.controller",
            &mut errors,
        );
        Self::check_escalation(
            t.warning_sigma,
            t.critical_sigma,
            "thresholds.sigma",
            &mut errors,
        );
        Self::check_descending(
            t.oil_pressure_warning_kpa,
            t.oil_pressure_critical_kpa,
            "thresholds.oil_pressure",
            &mut errors,
        );
        Self::check_descending(
            t.battery_warning_v,
            t.battery_critical_v,
            "thresholds.battery",
            &mut errors,
        );
        if t.warning_sigma <= 0.0 {
            errors.push(format!(
                "thresholds.warning_sigma ({:.2}) must be positive",
                t.warning_sigma
            ));
        }
        if t.escalation_warning_cycles == 0 || t.escalation_critical_cycles == 0 {
            errors.push("thresholds.escalation_*_cycles must be at least 1".to_string());
        }

        let s = &self.scheduler;
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&s.interval_minutes) {
            errors.push(format!(
                "scheduler.interval_minutes ({}) must be within {MIN_INTERVAL_MINUTES}..={MAX_INTERVAL_MINUTES}",
                s.interval_minutes
            ));
        }
        if s.call_timeout_secs == 0 {
            errors.push("scheduler.call_timeout_secs must be positive".to_string());
        }
        if s.shutdown_timeout_secs == 0 {
            errors.push("scheduler.shutdown_timeout_secs must be positive".to_string());
        }
        if s.ai_health_interval_secs == 0 {
            errors.push("scheduler.ai_health_interval_secs must be positive".to_string());
        }
        if s.ai_failure_limit == 0 {
            errors.push("scheduler.ai_failure_limit must be at least 1".to_string());
        }

        let b = &self.baseline;
        if b.min_samples < crate::baseline::PROVISIONAL_FLOOR {
            errors.push(format!(
                "baseline.min_samples ({}) must be at least {}",
                b.min_samples,
                crate::baseline::PROVISIONAL_FLOOR
            ));
        }
        if b.window_days == 0 {
            errors.push("baseline.window_days must be positive".to_string());
        }
        if b.stale_after_days == 0 {
            errors.push("baseline.stale_after_days must be positive".to_string());
        }
        if b.trend_window_hours == 0 {
            errors.push("baseline.trend_window_hours must be positive".to_string());
        }
        if self.store.retention_days < b.window_days {
            errors.push(format!(
                "store.retention_days ({}) must be >= baseline.window_days ({})",
                self.store.retention_days, b.window_days
            ));
        }

        let g = &self.generator;
        if !(g.rated_rpm.is_finite() && g.rated_rpm > 0.0) {
            errors.push(format!("generator.rated_rpm ({}) must be positive", g.rated_rpm));
        }
        if !(g.rated_kw.is_finite() && g.rated_kw > 0.0) {
            errors.push(format!("generator.rated_kw ({}) must be positive", g.rated_kw));
        }

        if self.enrichment.enabled && self.enrichment.endpoint.is_none() {
            errors.push("enrichment.enabled requires enrichment.endpoint".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_escalation(warning: f64, critical: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass
        if !warning.is_finite() || !critical.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got warning={warning}, critical={critical})"
            ));
            return;
        }
        if critical < warning {
            errors.push(format!(
                "{name}: critical ({critical:.3}) must be >= warning ({warning:.3})"
            ));
        }
    }

    /// Same as `check_escalation` for limits that alarm when a reading
    /// falls below them.
    fn check_descending(warning: f64, critical: f64, name: &str, errors: &mut Vec<String>) {
        if !warning.is_finite() || !critical.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got warning={warning}, critical={critical})"
            ));
            return;
        }
        if critical > warning {
            errors.push(format!(
                "{name}: critical ({critical:.3}) must be <= warning ({warning:.3})"
            ));
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Identifier used in logs
    #[serde(default = "default_generator_name")]
    pub name: String,

    /// Nominal engine speed (RPM)
    #[serde(default = "default_rated_rpm")]
    pub rated_rpm: f64,

    /// Nominal electrical output (kW)
    #[serde(default = "default_rated_kw")]
    pub rated_kw: f64,
}

fn default_generator_name() -> String {
    "GENSET-1".to_string()
}
fn default_rated_rpm() -> f64 {
    DEFAULT_RATED_RPM
}
fn default_rated_kw() -> f64 {
    DEFAULT_RATED_KW
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            name: default_generator_name(),
            rated_rpm: DEFAULT_RATED_RPM,
            rated_kw: DEFAULT_RATED_KW,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between analysis cycles (1..=30)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Timeout on every store and enricher call (seconds)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Wait for the in-flight cycle at shutdown (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// AI health ping interval (seconds)
    #[serde(default = "default_ai_health_interval_secs")]
    pub ai_health_interval_secs: u64,

    /// Consecutive AI failures before auto-disable
    #[serde(default = "default_ai_failure_limit")]
    pub ai_failure_limit: u32,

    /// Engine-stopped time before an ACTIVE agent pauses (seconds)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}
fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}
fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}
fn default_ai_health_interval_secs() -> u64 {
    DEFAULT_AI_HEALTH_INTERVAL_SECS
}
fn default_ai_failure_limit() -> u32 {
    DEFAULT_AI_FAILURE_LIMIT
}
fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            ai_health_interval_secs: DEFAULT_AI_HEALTH_INTERVAL_SECS,
            ai_failure_limit: DEFAULT_AI_FAILURE_LIMIT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub const fn ai_health_interval(&self) -> Duration {
        Duration::from_secs(self.ai_health_interval_secs)
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.idle_timeout_secs).unwrap_or(i64::MAX / 1000))
    }
}

// ============================================================================
// Baselines
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// History scanned by bootstrap (days)
    #[serde(default = "default_window_days")]
    pub window_days: u64,

    /// Samples for a full-confidence baseline; half of this (at least 3)
    /// yields a provisional one
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Recompute baselines older than this (days)
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u64,

    /// Live trend regression window (hours)
    #[serde(default = "default_trend_window_hours")]
    pub trend_window_hours: u64,
}

fn default_window_days() -> u64 {
    DEFAULT_BOOTSTRAP_WINDOW_DAYS
}
fn default_min_samples() -> u64 {
    DEFAULT_MIN_SAMPLES
}
fn default_stale_after_days() -> u64 {
    DEFAULT_STALE_AFTER_DAYS
}
fn default_trend_window_hours() -> u64 {
    DEFAULT_TREND_WINDOW_HOURS
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_BOOTSTRAP_WINDOW_DAYS,
            min_samples: DEFAULT_MIN_SAMPLES,
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
            trend_window_hours: DEFAULT_TREND_WINDOW_HOURS,
        }
    }
}

impl BaselineConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::try_from(self.window_days).unwrap_or(i64::MAX / 86_400_000))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::days(i64::try_from(self.stale_after_days).unwrap_or(36_500))
    }

    pub fn trend_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.trend_window_hours).unwrap_or(876_000))
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Absolute alert limits plus the generic sigma rule.
///
/// Units are in the field names. "Below" limits (oil pressure, battery)
/// alarm when a reading drops under them; the rest alarm above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_oil_pressure_warning_kpa")]
    pub oil_pressure_warning_kpa: f64,
    #[serde(default = "default_oil_pressure_critical_kpa")]
    pub oil_pressure_critical_kpa: f64,

    /// Deviation from rated engine speed (RPM)
    #[serde(default = "default_rpm_deviation_warning")]
    pub rpm_deviation_warning: f64,
    #[serde(default = "default_rpm_deviation_critical")]
    pub rpm_deviation_critical: f64,

    #[serde(default = "default_coolant_warning_c")]
    pub coolant_warning_c: f64,
    #[serde(default = "default_coolant_critical_c")]
    pub coolant_critical_c: f64,

    #[serde(default = "default_battery_warning_v")]
    pub battery_warning_v: f64,
    #[serde(default = "default_battery_critical_v")]
    pub battery_critical_v: f64,

    #[serde(default = "default_controller_warning_c")]
    pub controller_warning_c: f64,
    #[serde(default = "default_controller_critical_c")]
    pub controller_critical_c: f64,

    /// Sigma distance from the band baseline mean
    #[serde(default = "default_warning_sigma")]
    pub warning_sigma: f64,
    #[serde(default = "default_critical_sigma")]
    pub critical_sigma: f64,

    #[serde(default = "default_escalation_warning_cycles")]
    pub escalation_warning_cycles: u32,
    #[serde(default = "default_escalation_critical_cycles")]
    pub escalation_critical_cycles: u32,
}

fn default_oil_pressure_warning_kpa() -> f64 {
    DEFAULT_OIL_PRESSURE_WARNING_KPA
}
fn default_oil_pressure_critical_kpa() -> f64 {
    DEFAULT_OIL_PRESSURE_CRITICAL_KPA
}
fn default_rpm_deviation_warning() -> f64 {
    DEFAULT_RPM_DEVIATION_WARNING
}
fn default_rpm_deviation_critical() -> f64 {
    DEFAULT_RPM_DEVIATION_CRITICAL
}
fn default_coolant_warning_c() -> f64 {
    DEFAULT_COOLANT_WARNING_C
}
fn default_coolant_critical_c() -> f64 {
    DEFAULT_COOLANT_CRITICAL_C
}
fn default_battery_warning_v() -> f64 {
    DEFAULT_BATTERY_WARNING_V
}
fn default_battery_critical_v() -> f64 {
    DEFAULT_BATTERY_CRITICAL_V
}
fn default_controller_warning_c() -> f64 {
    DEFAULT_CONTROLLER_WARNING_C
}
fn default_controller_critical_c() -> f64 {
    DEFAULT_CONTROLLER_CRITICAL_C
}
fn default_warning_sigma() -> f64 {
    DEFAULT_WARNING_SIGMA
}
fn default_critical_sigma() -> f64 {
    DEFAULT_CRITICAL_SIGMA
}
fn default_escalation_warning_cycles() -> u32 {
    DEFAULT_ESCALATION_WARNING_CYCLES
}
fn default_escalation_critical_cycles() -> u32 {
    DEFAULT_ESCALATION_CRITICAL_CYCLES
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            oil_pressure_warning_kpa: DEFAULT_OIL_PRESSURE_WARNING_KPA,
            oil_pressure_critical_kpa: DEFAULT_OIL_PRESSURE_CRITICAL_KPA,
            rpm_deviation_warning: DEFAULT_RPM_DEVIATION_WARNING,
            rpm_deviation_critical: DEFAULT_RPM_DEVIATION_CRITICAL,
            coolant_warning_c: DEFAULT_COOLANT_WARNING_C,
            coolant_critical_c: DEFAULT_COOLANT_CRITICAL_C,
            battery_warning_v: DEFAULT_BATTERY_WARNING_V,
            battery_critical_v: DEFAULT_BATTERY_CRITICAL_V,
            controller_warning_c: DEFAULT_CONTROLLER_WARNING_C,
            controller_critical_c: DEFAULT_CONTROLLER_CRITICAL_C,
            warning_sigma: DEFAULT_WARNING_SIGMA,
            critical_sigma: DEFAULT_CRITICAL_SIGMA,
            escalation_warning_cycles: DEFAULT_ESCALATION_WARNING_CYCLES,
            escalation_critical_cycles: DEFAULT_ESCALATION_CRITICAL_CYCLES,
        }
    }
}

// ============================================================================
// Store / Enrichment / Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Raw samples older than this are pruned (days, >= baseline.window_days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}
fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::try_from(self.retention_days).unwrap_or(36_500))
    }
}

/// Optional AI narrative layer. Off unless an endpoint is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Start with AI enrichment switched on
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:11434/v1`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_enrichment_model")]
    pub model: String,

    /// Environment variable holding the API key, if the endpoint needs one
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_enrichment_model() -> String {
    DEFAULT_ENRICHMENT_MODEL.to_string()
}
fn default_api_key_env() -> String {
    DEFAULT_ENRICHMENT_API_KEY_ENV.to_string()
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            model: default_enrichment_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    DEFAULT_SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}
