//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use powertrain_analyst::store::{
    InMemoryStore, Measurement, MeasurementRecord, MetricStore, SeriesPoint, StoreError,
};
use powertrain_analyst::types::{MetricKind, MetricSample};

/// Thursday midday, well clear of any hour, day, week or month boundary
pub fn midweek_noon() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-16T12:40:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Running sample in the NORMAL band (50% of rated output)
pub fn running(ts: DateTime<Utc>, oil: f64) -> MetricSample {
    running_at_load(ts, 50.0, oil)
}

pub fn running_at_load(ts: DateTime<Utc>, power: f64, oil: f64) -> MetricSample {
    MetricSample::new(ts)
        .with(MetricKind::EngineSpeed, 1800.0)
        .with(MetricKind::PowerFraction, power)
        .with(MetricKind::OilPressure, oil)
        .with(MetricKind::CoolantTemperature, 82.0)
        .with(MetricKind::BatteryVoltage, 27.2)
}

pub fn stopped(ts: DateTime<Utc>) -> MetricSample {
    MetricSample::new(ts)
        .with(MetricKind::EngineSpeed, 0.0)
        .with(MetricKind::PowerFraction, 0.0)
        .with(MetricKind::BatteryVoltage, 26.8)
}

/// Store whose bulk sample query takes `delay`, so a bootstrap stays in
/// flight long enough to collide with another one.
pub struct SlowStore {
    pub inner: Arc<InMemoryStore>,
    pub delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl MetricStore for SlowStore {
    async fn query_window(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by_load_band: bool,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        self.inner
            .query_window(metric, start, end, group_by_load_band)
            .await
    }

    async fn query_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.query_samples(start, end).await
    }

    async fn latest_sample(&self) -> Result<Option<MetricSample>, StoreError> {
        self.inner.latest_sample().await
    }

    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError> {
        self.inner.append_sample(sample).await
    }

    async fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.prune_samples_before(cutoff).await
    }

    async fn write(&self, record: MeasurementRecord) -> Result<(), StoreError> {
        self.inner.write(record).await
    }

    async fn query_records(
        &self,
        measurement: Measurement,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRecord>, StoreError> {
        self.inner.query_records(measurement, start, end).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "slow-memory"
    }
}
