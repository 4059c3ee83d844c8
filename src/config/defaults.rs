//! Default values for every configuration key.
//!
//! Grouped by subsystem. `AnalystConfig::default()` is built from these.

// ============================================================================
// Generator
// ============================================================================

/// Rated engine speed for a 60 Hz, 4-pole genset (RPM).
pub const DEFAULT_RATED_RPM: f64 = 1800.0;

/// Rated electrical output, used to convert watt readings to percent (kW).
pub const DEFAULT_RATED_KW: f64 = 150.0;

// ============================================================================
// Scheduler
// ============================================================================

/// Analysis cycle interval (minutes).
pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Allowed cycle interval range (minutes, inclusive).
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 30;

/// Per-call timeout for the store and the enricher (seconds).
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// Hard limit on waiting for the in-flight cycle at shutdown (seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// AI health ping interval (seconds).
pub const DEFAULT_AI_HEALTH_INTERVAL_SECS: u64 = 60;

/// Consecutive enrichment failures before AI is switched off.
pub const DEFAULT_AI_FAILURE_LIMIT: u32 = 2;

/// Engine-stopped time before an ACTIVE agent pauses (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Capacity of the scheduler's control channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Baselines
// ============================================================================

/// Historical window scanned by bootstrap (days).
pub const DEFAULT_BOOTSTRAP_WINDOW_DAYS: u64 = 30;

/// Samples for a full-confidence baseline.
pub const DEFAULT_MIN_SAMPLES: u64 = 10;

/// Baselines older than this are recomputed (days).
pub const DEFAULT_STALE_AFTER_DAYS: u64 = 7;

/// Window of live data each cycle regresses over (hours).
pub const DEFAULT_TREND_WINDOW_HOURS: u64 = 24;

// ============================================================================
// Thresholds
// ============================================================================

pub const DEFAULT_OIL_PRESSURE_WARNING_KPA: f64 = 250.0;
pub const DEFAULT_OIL_PRESSURE_CRITICAL_KPA: f64 = 150.0;

pub const DEFAULT_RPM_DEVIATION_WARNING: f64 = 50.0;
pub const DEFAULT_RPM_DEVIATION_CRITICAL: f64 = 100.0;

pub const DEFAULT_COOLANT_WARNING_C: f64 = 95.0;
pub const DEFAULT_COOLANT_CRITICAL_C: f64 = 105.0;

pub const DEFAULT_BATTERY_WARNING_V: f64 = 24.0;
pub const DEFAULT_BATTERY_CRITICAL_V: f64 = 22.0;

pub const DEFAULT_CONTROLLER_WARNING_C: f64 = 70.0;
pub const DEFAULT_CONTROLLER_CRITICAL_C: f64 = 85.0;

pub const DEFAULT_WARNING_SIGMA: f64 = 2.0;
pub const DEFAULT_CRITICAL_SIGMA: f64 = 3.0;

/// Consecutive WARNING-or-worse cycles that raise a metric one tier.
pub const DEFAULT_ESCALATION_WARNING_CYCLES: u32 = 3;

/// Consecutive CRITICAL cycles that recommend shutdown.
pub const DEFAULT_ESCALATION_CRITICAL_CYCLES: u32 = 2;

// ============================================================================
// Storage / Server / Enrichment
// ============================================================================

pub const DEFAULT_STORE_PATH: &str = "./data/powertrain";

/// Raw samples older than this are pruned (days). Never shorter than the
/// bootstrap window.
pub const DEFAULT_RETENTION_DAYS: u64 = 90;

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

pub const DEFAULT_ENRICHMENT_MODEL: &str = "llama3.1:8b";

pub const DEFAULT_ENRICHMENT_API_KEY_ENV: &str = "ANALYST_AI_API_KEY";
