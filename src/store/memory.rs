//! In-memory metric store for tests and minimal deployments
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{
    project_series, Measurement, MeasurementRecord, MetricStore, SeriesPoint, StoreError,
};
use crate::load_band::LoadBandClassifier;
use crate::types::{MetricKind, MetricSample};

pub struct InMemoryStore {
    samples: RwLock<Vec<MetricSample>>,
    records: RwLock<Vec<MeasurementRecord>>,
    classifier: LoadBandClassifier,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new(classifier: LoadBandClassifier) -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            records: RwLock::new(Vec::new()),
            classifier,
            available: AtomicBool::new(true),
        }
    }

    /// Ingest one raw sample, keeping samples time-ordered.
    pub fn insert_sample(&self, sample: MetricSample) -> Result<(), StoreError> {
        let mut samples = self
            .samples
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let idx = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(idx, sample);
        Ok(())
    }

    pub fn insert_samples(
        &self,
        samples: impl IntoIterator<Item = MetricSample>,
    ) -> Result<(), StoreError> {
        for sample in samples {
            self.insert_sample(sample)?;
        }
        Ok(())
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`
    /// while `available` is false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All records written to one family, oldest first.
    pub fn records(&self, measurement: Measurement) -> Vec<MeasurementRecord> {
        self.records
            .read()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.measurement == measurement)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let samples = self
            .samples
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(LoadBandClassifier::default())
    }
}

#[async_trait]
impl MetricStore for InMemoryStore {
    async fn query_window(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by_load_band: bool,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        self.check_available()?;
        let samples = self.samples_between(start, end)?;
        let classifier = group_by_load_band.then_some(&self.classifier);
        Ok(project_series(&samples, metric, classifier))
    }

    async fn query_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        self.check_available()?;
        self.samples_between(start, end)
    }

    async fn latest_sample(&self) -> Result<Option<MetricSample>, StoreError> {
        self.check_available()?;
        let samples = self
            .samples
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(samples.last().cloned())
    }

    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError> {
        self.check_available()?;
        self.insert_sample(sample)
    }

    async fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut samples = self
            .samples
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let before = samples.len();
        samples.retain(|s| s.timestamp >= cutoff);
        Ok(before - samples.len())
    }

    async fn write(&self, record: MeasurementRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        records.push(record);
        Ok(())
    }

    async fn query_records(
        &self,
        measurement: Measurement,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRecord>, StoreError> {
        self.check_available()?;
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut found: Vec<MeasurementRecord> = records
            .iter()
            .filter(|r| r.measurement == measurement && r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.timestamp);
        Ok(found)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_band::LoadBand;
    use chrono::Duration;

    fn sample(ts: DateTime<Utc>, power: f64, oil: f64) -> MetricSample {
        MetricSample::new(ts)
            .with(MetricKind::EngineSpeed, 1800.0)
            .with(MetricKind::PowerFraction, power)
            .with(MetricKind::OilPressure, oil)
    }

    #[tokio::test]
    async fn test_samples_kept_in_time_order() {
        let store = InMemoryStore::default();
        let now = Utc::now();
        store.insert_sample(sample(now, 50.0, 300.0)).unwrap();
        store.insert_sample(sample(now - Duration::minutes(5), 30.0, 310.0)).unwrap();

        let latest = store.latest_sample().await.unwrap().unwrap();
        assert_eq!(latest.timestamp, now);

        let all = store
            .query_samples(now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].timestamp < all[1].timestamp);
    }

    #[tokio::test]
    async fn test_query_window_groups_by_band() {
        let store = InMemoryStore::default();
        let now = Utc::now();
        store.insert_sample(sample(now - Duration::minutes(2), 10.0, 320.0)).unwrap();
        store.insert_sample(sample(now - Duration::minutes(1), 65.0, 290.0)).unwrap();

        let points = store
            .query_window(MetricKind::OilPressure, now - Duration::hours(1), now, true)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].load_band, Some(LoadBand::Light));
        assert_eq!(points[1].load_band, Some(LoadBand::Heavy));

        let ungrouped = store
            .query_window(MetricKind::OilPressure, now - Duration::hours(1), now, false)
            .await
            .unwrap();
        assert!(ungrouped.iter().all(|p| p.load_band.is_none()));
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let store = InMemoryStore::default();
        store.set_available(false);

        let err = store.latest_sample().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.append_sample(sample(Utc::now(), 50.0, 300.0)).await.is_err());
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_prune_drops_only_old_samples() {
        let store = InMemoryStore::default();
        let now = Utc::now();
        store.append_sample(sample(now - Duration::days(50), 50.0, 300.0)).await.unwrap();
        store.append_sample(sample(now - Duration::days(1), 50.0, 301.0)).await.unwrap();

        assert_eq!(store.prune_samples_before(now - Duration::days(45)).await.unwrap(), 1);
        let left = store.query_samples(now - Duration::days(60), now).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].get(MetricKind::OilPressure), Some(301.0));
    }

    #[tokio::test]
    async fn test_records_filtered_by_family() {
        let store = InMemoryStore::default();
        let now = Utc::now();
        store
            .write(MeasurementRecord::new(Measurement::Insights, now).field("insight_text", "x"))
            .await
            .unwrap();
        store
            .write(MeasurementRecord::new(Measurement::SystemStatus, now))
            .await
            .unwrap();

        let insights = store
            .query_records(Measurement::Insights, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].field_str("insight_text"), Some("x"));
    }
}
