//! Agent state machine and the published status snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alerts::{Alert, Severity};
use crate::load_band::LoadBand;
use crate::memory::BootstrapStatus;
use crate::types::MetricKind;

/// Lifecycle of the analyst:
///
/// ```text
///            first good cycle            STOPPED band
///  OFFLINE ───────────────────► ACTIVE ◄──────────────► PAUSED
///     ▲                           │      non-zero load     │
///     └──── store unreachable ────┴────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    #[default]
    Offline,
    Active,
    Paused,
}

impl AgentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cycle's analysis included an AI narrative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisMode {
    #[default]
    Local,
    Ai,
}

impl AnalysisMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Ai => "AI",
        }
    }
}

/// Read-only view of the analyst, replaced wholesale after every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generator: String,
    pub state: AgentState,
    pub bootstrap_status: BootstrapStatus,
    pub bootstrap_progress: u8,
    pub load_band: Option<LoadBand>,
    pub readings: BTreeMap<MetricKind, f64>,
    pub alerts: Vec<Alert>,
    pub overall: Severity,
    pub shutdown_recommended: bool,
    pub ai_enabled: bool,
    pub mode: AnalysisMode,
    pub interval_minutes: u64,
    pub heartbeat: Option<DateTime<Utc>>,
    /// Timestamp of the sample the readings came from
    pub sample_at: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    /// The last cycle failed, or its newest sample was older than one
    /// interval; fields describe older data
    pub stale: bool,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub fn initial(generator: &str, interval_minutes: u64, ai_enabled: bool) -> Self {
        Self {
            generator: generator.to_string(),
            state: AgentState::Offline,
            bootstrap_status: BootstrapStatus::Unknown,
            bootstrap_progress: 0,
            load_band: None,
            readings: BTreeMap::new(),
            alerts: Vec::new(),
            overall: Severity::Ok,
            shutdown_recommended: false,
            ai_enabled,
            mode: AnalysisMode::Local,
            interval_minutes,
            heartbeat: None,
            sample_at: None,
            cycle_count: 0,
            stale: false,
            last_error: None,
        }
    }
}
