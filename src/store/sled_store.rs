//! Sled-backed metric store
//!
//! Layout: one tree for raw samples and one tree per measurement family.
//! Keys are the timestamp (microseconds, big-endian, so they sort
//! chronologically) followed by a monotonically generated id so that
//! points sharing a timestamp never overwrite each other. Values are JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;

use super::{
    project_series, Measurement, MeasurementRecord, MetricStore, SeriesPoint, StoreError,
    RAW_MEASUREMENT,
};
use crate::load_band::LoadBandClassifier;
use crate::types::{MetricKind, MetricSample};

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    samples: sled::Tree,
    records: HashMap<Measurement, sled::Tree>,
    classifier: LoadBandClassifier,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, classifier: LoadBandClassifier) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db, classifier)
    }

    /// Throwaway store that lives only as long as the process.
    pub fn temporary(classifier: LoadBandClassifier) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, classifier)
    }

    fn from_db(db: sled::Db, classifier: LoadBandClassifier) -> Result<Self, StoreError> {
        let samples = db.open_tree(RAW_MEASUREMENT)?;
        let mut records = HashMap::new();
        for measurement in Measurement::ALL {
            records.insert(measurement, db.open_tree(measurement.name())?);
        }
        Ok(Self {
            db,
            samples,
            records,
            classifier,
        })
    }

    /// Ingest one raw sample.
    pub fn insert_sample(&self, sample: &MetricSample) -> Result<(), StoreError> {
        let key = self.point_key(sample.timestamp)?;
        let value = serde_json::to_vec(sample)?;
        self.samples.insert(key, value)?;
        Ok(())
    }

    /// Number of raw samples held
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn point_key(&self, ts: DateTime<Utc>) -> Result<[u8; 16], StoreError> {
        let id = self.db.generate_id()?;
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&timestamp_bytes(ts));
        key[8..].copy_from_slice(&id.to_be_bytes());
        Ok(key)
    }

    fn records_tree(&self, measurement: Measurement) -> Result<&sled::Tree, StoreError> {
        self.records
            .get(&measurement)
            .ok_or_else(|| StoreError::Backend(format!("tree for {measurement} not open")))
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let mut samples = Vec::new();
        for item in self.samples.range(range_start(start)..=range_end(end)) {
            let (_, value) = item?;
            samples.push(serde_json::from_slice::<MetricSample>(&value)?);
        }
        Ok(samples)
    }
}

fn timestamp_bytes(ts: DateTime<Utc>) -> [u8; 8] {
    u64::try_from(ts.timestamp_micros()).unwrap_or(0).to_be_bytes()
}

fn range_start(ts: DateTime<Utc>) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&timestamp_bytes(ts));
    key
}

fn range_end(ts: DateTime<Utc>) -> [u8; 16] {
    let mut key = [0xFFu8; 16];
    key[..8].copy_from_slice(&timestamp_bytes(ts));
    key
}

#[async_trait]
impl MetricStore for SledStore {
    async fn query_window(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by_load_band: bool,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let samples = self.samples_between(start, end)?;
        let classifier = group_by_load_band.then_some(&self.classifier);
        Ok(project_series(&samples, metric, classifier))
    }

    async fn query_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        self.samples_between(start, end)
    }

    async fn latest_sample(&self) -> Result<Option<MetricSample>, StoreError> {
        match self.samples.last()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError> {
        self.insert_sample(&sample)
    }

    async fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let end = range_start(cutoff);
        let mut deleted = 0;
        for item in self.samples.range(..end) {
            let (key, _) = item?;
            self.samples.remove(key)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn write(&self, record: MeasurementRecord) -> Result<(), StoreError> {
        let tree = self.records_tree(record.measurement)?;
        let key = self.point_key(record.timestamp)?;
        let value = serde_json::to_vec(&record)?;
        tree.insert(key, value)?;
        Ok(())
    }

    async fn query_records(
        &self,
        measurement: Measurement,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasurementRecord>, StoreError> {
        let tree = self.records_tree(measurement)?;
        let mut records = Vec::new();
        for item in tree.range(range_start(start)..=range_end(end)) {
            let (_, value) = item?;
            records.push(serde_json::from_slice::<MeasurementRecord>(&value)?);
        }
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.size_on_disk()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}
