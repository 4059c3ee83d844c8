//! Powertrain Analyst: load-band-aware health analysis for diesel generators
//!
//! Watches generator telemetry in a time-series store, learns what "normal"
//! looks like for each load band, and raises escalating alerts when the
//! powertrain drifts away from it.
//!
//! ## Architecture
//!
//! - **Load bands** (`load_band`): STOPPED, LIGHT, MODERATE, NORMAL, HEAVY, MAX
//! - **Statistics** (`stats`): Welford accumulators, OLS trends with t-test
//!   significance, sigma deviation
//! - **Baselines** (`baseline`): per (band, period) statistics with confidence
//! - **Memory** (`memory`): baselines, insights and bootstrap lifecycle,
//!   persisted through the store
//! - **Alerts** (`alerts`): thresholds, sigma rule, cross-cycle escalation
//! - **Scheduler** (`scheduler`): ACTIVE / PAUSED / OFFLINE state machine
//!   driving analysis cycles
//! - **Enrichment** (`enrichment`): optional AI narrative with a circuit breaker
//! - **API** (`api`): axum router over the scheduler handle

pub mod alerts;
pub mod api;
pub mod baseline;
pub mod config;
pub mod enrichment;
pub mod load_band;
pub mod memory;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod types;

pub use alerts::{Alert, AlertClassifier, CycleAlerts, Severity};
pub use baseline::{Baseline, BaselineConfidence, PeriodType};
pub use config::{AnalystConfig, ConfigError};
pub use load_band::{LoadBand, LoadBandClassifier};
pub use memory::{BootstrapStatus, MemoryError, MemoryManager, MemorySettings};
pub use scheduler::{AgentState, AnalystScheduler, SchedulerHandle, StatusSnapshot};
pub use store::{InMemoryStore, MetricStore, SledStore, StoreError};
pub use types::{Insight, KnowledgeType, MetricKind, MetricSample};
