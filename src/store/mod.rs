//! Metric Store Adapter
//!
//! The analyst's narrow view of the time-series store:
//! - raw controller samples, queried per metric and window
//! - four families of tagged measurement records it writes back
//!   (baselines, analysis results, insights, system status)
//!
//! Backends:
//! - `InMemoryStore`: tests and minimal deployments
//! - `SledStore`: embedded durable store

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::load_band::{LoadBand, LoadBandClassifier};
use crate::types::{MetricKind, MetricSample};

/// Name of the raw telemetry series written by the field-bus poller
pub const RAW_MEASUREMENT: &str = "generator_metrics";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store could not be reached. Retry next cycle.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => Self::Unavailable(e.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Measurement families the analyst writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    Baselines,
    Analysis,
    Insights,
    SystemStatus,
}

impl Measurement {
    pub const ALL: [Self; 4] = [
        Self::Baselines,
        Self::Analysis,
        Self::Insights,
        Self::SystemStatus,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Baselines => "powertrain_baselines",
            Self::Analysis => "powertrain_analysis",
            Self::Insights => "powertrain_insights",
            Self::SystemStatus => "powertrain_status",
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A field value in a measurement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One tagged point written to a measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub measurement: Measurement,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl MeasurementRecord {
    pub fn new(measurement: Measurement, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field. Non-finite floats are dropped, JSON cannot carry them.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        if matches!(value, FieldValue::Float(v) if !v.is_finite()) {
            return self;
        }
        self.fields.insert(key.into(), value);
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_f64)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_str)
    }

    pub fn field_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(FieldValue::as_bool)
    }
}

/// One reading of one metric, as returned by `query_window`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Present when the query asked for load-band grouping
    pub load_band: Option<LoadBand>,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Read/write contract the analyst needs from the time-series store.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across the scheduler, bootstrap and API tasks.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Time-ordered readings of one metric in `[start, end]`. With
    /// `group_by_load_band` each point carries the band of its sample.
    async fn query_window(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by_load_band: bool,
    ) -> Result<Vec<SeriesPoint>, StoreError>;

    /// Full samples in `[start, end]`, oldest first
    async fn query_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError>;

    async fn latest_sample(&self) -> Result<Option<MetricSample>, StoreError>;

    /// Ingest one raw controller sample into the `RAW_MEASUREMENT` series.
    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError>;

    /// Delete raw samples older than `cutoff`, returning how many went.
    /// Measurement records are kept, they form the audit trail.
    async fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Append a measurement record. Records are never overwritten.
    async fn write(&self, record: MeasurementRecord) -> Result<(), StoreError>;

    /// Records of one family in `[start, end]`, oldest first
    async fn query_records(
        &self,
        measurement: Measurement,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Bound a store call. A call that outlives `limit` counts as the store
/// being unreachable.
pub async fn with_timeout<T, F>(limit: std::time::Duration, call: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| {
        StoreError::Unavailable(format!("call timed out after {}s", limit.as_secs()))
    })?
}

/// Project samples onto a single metric's series.
fn project_series(
    samples: &[MetricSample],
    metric: MetricKind,
    classifier: Option<&LoadBandClassifier>,
) -> Vec<SeriesPoint> {
    samples
        .iter()
        .filter_map(|sample| {
            sample.get(metric).map(|value| SeriesPoint {
                timestamp: sample.timestamp,
                value,
                load_band: classifier.map(|c| c.classify_sample(sample)),
            })
        })
        .collect()
}
