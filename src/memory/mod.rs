//! Memory Manager
//!
//! Owns everything the analyst learns over time:
//!
//! - load-band baselines, keyed by (band, period)
//! - an append-only log of insights
//! - historical events: those found by the last bootstrap plus live sigma
//!   anomalies since
//! - the bootstrap lifecycle (status and 0..=100 progress)
//!
//! Every mutation is written through to the [`MetricStore`] so a restart
//! can [`restore`](MemoryManager::restore) the learned state. Bootstrap is
//! guarded by an atomic flag: at most one runs at a time, and it can run
//! alongside analysis cycles.

pub mod bootstrap;
mod insights;

pub use bootstrap::HistoricalEvent;
pub use insights::{extract_ai_insights, InsightQuery, MAX_AI_INSIGHTS};

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::alerts::Severity;
use crate::baseline::{Baseline, BaselineConfidence, BaselineKey, PeriodType};
use crate::config::AnalystConfig;
use crate::load_band::{LoadBand, LoadBandClassifier};
use crate::store::{self, Measurement, MeasurementRecord, MetricStore, StoreError};
use crate::types::{Insight, InsightConfidence, KnowledgeType, MetricSample};

/// Tag written with every bootstrap status record
pub const CALCULATION_METHOD: &str = "30day_statistical";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("bootstrap already running")]
    BootstrapAlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MemoryError {
    /// The store could not be reached (including timeouts)
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

// ============================================================================
// Bootstrap state
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    /// Not yet restored from the store
    #[default]
    Unknown,
    Needed,
    InProgress,
    Complete,
    /// Finished, but the window held nothing to baseline
    CompletedNoBaselines,
}

impl BootstrapStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Needed => "needed",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::CompletedNoBaselines => "completed_no_baselines",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Unknown,
            Self::Needed,
            Self::InProgress,
            Self::Complete,
            Self::CompletedNoBaselines,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapState {
    pub status: BootstrapStatus,
    /// 0..=100, never decreases within a run
    pub progress: u8,
    pub baseline_count: usize,
    pub event_count: usize,
    pub last_completed: Option<DateTime<Utc>>,
}

/// Result of a finished bootstrap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapOutcome {
    pub status: BootstrapStatus,
    pub baseline_count: usize,
    pub insight_count: usize,
    pub events: Vec<HistoricalEvent>,
    pub completed_at: DateTime<Utc>,
}

/// What a cycle should do about baselines before analysing `band`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineAction {
    None,
    RefreshBand(LoadBand),
    FullBootstrap,
}

/// Clears the bootstrap flag however the run ends.
struct BootstrapGuard<'a>(&'a AtomicBool);

impl<'a> BootstrapGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BootstrapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// History scanned by bootstrap
    pub window: Duration,
    pub min_samples: u64,
    pub stale_after: Duration,
    pub rated_rpm: f64,
    pub classifier: LoadBandClassifier,
    pub call_timeout: std::time::Duration,
    /// Raw samples older than this are pruned
    pub retention: Duration,
}

impl MemorySettings {
    pub fn from_config(config: &AnalystConfig) -> Self {
        Self {
            window: config.baseline.window(),
            min_samples: config.baseline.min_samples,
            stale_after: config.baseline.stale_after(),
            rated_rpm: config.generator.rated_rpm,
            classifier: LoadBandClassifier::new(config.generator.rated_kw),
            call_timeout: config.scheduler.call_timeout(),
            retention: config.store.retention(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::from_config(&AnalystConfig::default())
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct MemoryManager {
    store: Arc<dyn MetricStore>,
    settings: MemorySettings,
    baselines: RwLock<HashMap<BaselineKey, Baseline>>,
    insights: RwLock<Vec<Insight>>,
    /// Found by the last bootstrap; replaced on each run
    events: RwLock<Vec<HistoricalEvent>>,
    /// Raised by analysis cycles, newest first
    live_events: RwLock<Vec<HistoricalEvent>>,
    bootstrap_running: AtomicBool,
    bootstrap_state: ArcSwap<BootstrapState>,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MetricStore>, settings: MemorySettings) -> Self {
        Self {
            store,
            settings,
            baselines: RwLock::new(HashMap::new()),
            insights: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            live_events: RwLock::new(Vec::new()),
            bootstrap_running: AtomicBool::new(false),
            bootstrap_state: ArcSwap::from_pointee(BootstrapState::default()),
        }
    }

    pub const fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    pub fn bootstrap_state(&self) -> Arc<BootstrapState> {
        self.bootstrap_state.load_full()
    }

    pub fn is_bootstrap_running(&self) -> bool {
        self.bootstrap_running.load(Ordering::Acquire)
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, MemoryError> {
        Ok(store::with_timeout(self.settings.call_timeout, call).await?)
    }

    fn advance_progress(&self, progress: u8) {
        self.bootstrap_state.rcu(|state| {
            let mut next = BootstrapState::clone(state);
            next.progress = next.progress.max(progress.min(100));
            next
        });
    }

    // ------------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------------

    /// Bootstrap over the configured window ending now.
    pub async fn bootstrap(&self) -> Result<BootstrapOutcome, MemoryError> {
        let now = Utc::now();
        let start = now.checked_sub_signed(self.settings.window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.bootstrap_at(start, now).await
    }

    /// Scan `[window_start, now]` and rebuild baselines, trend and pattern
    /// insights and historical events from it.
    ///
    /// A concurrent call fails with `BootstrapAlreadyRunning` and changes
    /// nothing.
    pub async fn bootstrap_at(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BootstrapOutcome, MemoryError> {
        let _guard = BootstrapGuard::acquire(&self.bootstrap_running)
            .ok_or(MemoryError::BootstrapAlreadyRunning)?;

        let previous = self.bootstrap_state.load_full();
        self.bootstrap_state.store(Arc::new(BootstrapState {
            status: BootstrapStatus::InProgress,
            progress: 0,
            ..BootstrapState::clone(&previous)
        }));
        info!(
            window_start = %window_start,
            window_end = %now,
            backend = self.store.backend_name(),
            "Bootstrap started"
        );

        match self.run_bootstrap(window_start, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "Bootstrap failed");
                self.bootstrap_state.store(Arc::new(BootstrapState {
                    status: BootstrapStatus::Needed,
                    progress: 0,
                    ..BootstrapState::clone(&previous)
                }));
                Err(e)
            }
        }
    }

    async fn run_bootstrap(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BootstrapOutcome, MemoryError> {
        let classifier = &self.settings.classifier;

        let samples = self.timed(self.store.query_samples(window_start, now)).await?;
        self.advance_progress(20);
        debug!(samples = samples.len(), "Bootstrap window loaded");

        let baselines =
            bootstrap::compute_period_baselines(&samples, classifier, self.settings.min_samples, now);
        self.advance_progress(40);

        for baseline in &baselines {
            self.timed(self.store.write(baseline.to_record())).await?;
        }
        {
            let mut map = self.baselines.write().await;
            for baseline in &baselines {
                map.insert(baseline.key(), baseline.clone());
            }
        }
        self.advance_progress(60);

        let events = bootstrap::historical_events(&samples, classifier, self.settings.rated_rpm);
        let mut derived = bootstrap::trend_insights(&samples, classifier, now);
        derived.extend(bootstrap::seasonal_insights(&samples, classifier, now));
        if !events.is_empty() {
            derived.push(events_summary(&events, now));
        }
        let insight_count = derived.len();
        for insight in derived {
            self.record_insight(insight).await?;
        }
        *self.events.write().await = events.clone();
        self.advance_progress(90);

        let status = if baselines.is_empty() {
            BootstrapStatus::CompletedNoBaselines
        } else {
            BootstrapStatus::Complete
        };
        let record = MeasurementRecord::new(Measurement::SystemStatus, now)
            .tag("status_type", "bootstrap")
            .field("bootstrap_completed", true)
            .field("bootstrap_status", status.as_str())
            .field("bootstrap_progress", 100_i64)
            .field("baseline_count", baselines.len())
            .field("event_count", events.len())
            .field("bootstrap_timestamp", now.to_rfc3339())
            .field("calculation_method", CALCULATION_METHOD);
        self.timed(self.store.write(record)).await?;

        self.bootstrap_state.store(Arc::new(BootstrapState {
            status,
            progress: 100,
            baseline_count: baselines.len(),
            event_count: events.len(),
            last_completed: Some(now),
        }));
        info!(
            status = status.as_str(),
            baselines = baselines.len(),
            insights = insight_count,
            events = events.len(),
            "Bootstrap finished"
        );

        Ok(BootstrapOutcome {
            status,
            baseline_count: baselines.len(),
            insight_count,
            events,
            completed_at: now,
        })
    }

    // ------------------------------------------------------------------------
    // Baselines
    // ------------------------------------------------------------------------

    /// Decide what `band` needs before a cycle analyses it:
    ///
    /// - never bootstrapped, or last bootstrap older than the stale age:
    ///   full bootstrap
    /// - the band is missing a period baseline or one is stale: refresh
    ///   that band only
    pub async fn baseline_action(&self, band: LoadBand, now: DateTime<Utc>) -> BaselineAction {
        if self.is_bootstrap_running() {
            return BaselineAction::None;
        }
        match self.bootstrap_state.load().last_completed {
            None => return BaselineAction::FullBootstrap,
            Some(at) if now - at > self.settings.stale_after => {
                return BaselineAction::FullBootstrap
            }
            Some(_) => {}
        }
        if band.is_stopped() {
            return BaselineAction::None;
        }

        let map = self.baselines.read().await;
        let needs_refresh = PeriodType::ALL.iter().any(|period| {
            map.get(&(band, *period))
                .map_or(true, |b| b.is_stale(now, self.settings.stale_after))
        });
        if needs_refresh {
            BaselineAction::RefreshBand(band)
        } else {
            BaselineAction::None
        }
    }

    /// Recompute one baseline from its period's lookback if it is absent or
    /// older than the stale age. Returns whether a new baseline was stored.
    pub async fn refresh_baseline_if_stale(
        &self,
        band: LoadBand,
        period: PeriodType,
        now: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        if band.is_stopped() {
            return Ok(false);
        }
        if let Some(existing) = self.baselines.read().await.get(&(band, period)) {
            if !existing.is_stale(now, self.settings.stale_after) {
                return Ok(false);
            }
        }

        let start = now - period.lookback();
        let samples = self.timed(self.store.query_samples(start, now)).await?;
        let in_band: Vec<&MetricSample> = samples
            .iter()
            .filter(|s| self.settings.classifier.classify_sample(s) == band)
            .collect();

        let Some(baseline) =
            Baseline::compute(band, period, &in_band, self.settings.min_samples, now)
        else {
            debug!(band = %band, period = %period, samples = in_band.len(), "Not enough data to refresh baseline");
            return Ok(false);
        };

        self.timed(self.store.write(baseline.to_record())).await?;
        info!(
            band = %band,
            period = %period,
            samples = baseline.sample_count,
            confidence = baseline.confidence.as_str(),
            "Baseline refreshed"
        );
        self.baselines.write().await.insert(baseline.key(), baseline);
        Ok(true)
    }

    /// Refresh every period baseline of `band`. Returns how many changed.
    pub async fn refresh_band(&self, band: LoadBand, now: DateTime<Utc>) -> Result<usize, MemoryError> {
        let mut refreshed = 0;
        for period in PeriodType::ALL {
            if self.refresh_baseline_if_stale(band, period, now).await? {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Fold a live sample into every period baseline of its band, seeding
    /// the ones that do not exist yet. STOPPED is never folded.
    pub async fn fold_sample(
        &self,
        sample: &MetricSample,
        band: LoadBand,
        now: DateTime<Utc>,
    ) -> Result<usize, MemoryError> {
        if band.is_stopped() {
            return Ok(0);
        }
        let updated: Vec<Baseline> = {
            let mut map = self.baselines.write().await;
            PeriodType::ALL
                .iter()
                .map(|period| {
                    let baseline = map
                        .entry((band, *period))
                        .or_insert_with(|| Baseline::seed(band, *period, now));
                    baseline.fold_sample(sample, self.settings.min_samples, now);
                    baseline.clone()
                })
                .collect()
        };
        for baseline in &updated {
            self.timed(self.store.write(baseline.to_record())).await?;
        }
        Ok(updated.len())
    }

    /// Baseline to judge `band` against: the longest period with at least
    /// low confidence, else the longest period present.
    pub async fn reference_baseline(&self, band: LoadBand) -> Option<Baseline> {
        let map = self.baselines.read().await;
        let present: Vec<&Baseline> = PeriodType::REFERENCE_ORDER
            .iter()
            .filter_map(|p| map.get(&(band, *p)))
            .collect();
        present
            .iter()
            .find(|b| b.confidence >= BaselineConfidence::Low)
            .or_else(|| present.first())
            .map(|b| Baseline::clone(b))
    }

    pub async fn baseline(&self, band: LoadBand, period: PeriodType) -> Option<Baseline> {
        self.baselines.read().await.get(&(band, period)).cloned()
    }

    /// All baselines ordered by band then period
    pub async fn baselines(&self) -> Vec<Baseline> {
        let mut all: Vec<Baseline> = self.baselines.read().await.values().cloned().collect();
        all.sort_by_key(Baseline::key);
        all
    }

    // ------------------------------------------------------------------------
    // Insights & events
    // ------------------------------------------------------------------------

    /// Append an insight. Never deduplicates or rewrites earlier entries.
    pub async fn record_insight(&self, insight: Insight) -> Result<(), MemoryError> {
        self.timed(self.store.write(insights::insight_to_record(&insight)))
            .await?;
        debug!(
            knowledge_type = %insight.knowledge_type,
            text = %insight.tagged_text(),
            "Insight recorded"
        );
        self.insights.write().await.push(insight);
        Ok(())
    }

    /// Matching insights, oldest first
    pub async fn query_insights(&self, query: &InsightQuery, now: DateTime<Utc>) -> Vec<Insight> {
        self.insights
            .read()
            .await
            .iter()
            .filter(|i| query.matches(i, now))
            .cloned()
            .collect()
    }

    pub async fn insight_count(&self) -> usize {
        self.insights.read().await.len()
    }

    /// Persist a live anomaly as an `event` insight and put it at the head
    /// of the recent events.
    pub async fn record_event(&self, event: HistoricalEvent) -> Result<(), MemoryError> {
        let confidence = if event.severity >= Severity::Critical {
            InsightConfidence::High
        } else {
            InsightConfidence::Medium
        };
        let insight = Insight::statistical(
            KnowledgeType::Event,
            format!("[{}] {}", event.severity, event.description),
            confidence,
            event.timestamp,
        )
        .in_band(event.load_band)
        .supported_by(event.metric, event.value);
        self.record_insight(insight).await?;

        info!(
            severity = event.severity.as_str(),
            metric = %event.metric,
            value = event.value,
            band = %event.load_band,
            "Anomaly event recorded"
        );
        let mut live = self.live_events.write().await;
        live.insert(0, event);
        live.truncate(bootstrap::MAX_EVENTS);
        Ok(())
    }

    /// Bootstrap events and live anomalies merged, newest first, at most
    /// [`bootstrap::MAX_EVENTS`]
    pub async fn recent_events(&self) -> Vec<HistoricalEvent> {
        let mut all = self.live_events.read().await.clone();
        all.extend(self.events.read().await.iter().cloned());
        // Stable sort keeps live events ahead of bootstrap ones on ties
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(bootstrap::MAX_EVENTS);
        all
    }

    // ------------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------------

    /// Drop raw samples older than the retention window. Returns how many
    /// were removed.
    pub async fn prune_history(&self, now: DateTime<Utc>) -> Result<usize, MemoryError> {
        let cutoff = now
            .checked_sub_signed(self.settings.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.timed(self.store.prune_samples_before(cutoff)).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Raw samples past retention pruned");
        } else {
            debug!(cutoff = %cutoff, "Nothing past retention");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------------

    /// Reload baselines, insights and bootstrap status from the store.
    ///
    /// The newest baseline record per (band, period) wins. Unreadable
    /// records are logged and skipped.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<(), MemoryError> {
        let since = DateTime::<Utc>::MIN_UTC;

        let records = self
            .timed(self.store.query_records(Measurement::Baselines, since, now))
            .await?;
        let mut restored: HashMap<BaselineKey, Baseline> = HashMap::new();
        for record in &records {
            match Baseline::from_record(record, self.settings.min_samples) {
                Ok(baseline) => {
                    restored.insert(baseline.key(), baseline);
                }
                Err(e) => warn!(error = %e, "Skipping unreadable baseline record"),
            }
        }

        let insight_records = self
            .timed(self.store.query_records(Measurement::Insights, since, now))
            .await?;
        let restored_insights: Vec<Insight> = insight_records
            .iter()
            .filter_map(insights::insight_from_record)
            .collect();

        let status_records = self
            .timed(self.store.query_records(Measurement::SystemStatus, since, now))
            .await?;
        let last_bootstrap = status_records
            .iter()
            .filter(|r| r.field_bool("bootstrap_completed") == Some(true))
            .last();

        let state = last_bootstrap.map_or_else(
            || BootstrapState {
                status: BootstrapStatus::Needed,
                ..BootstrapState::default()
            },
            |record| BootstrapState {
                status: record
                    .field_str("bootstrap_status")
                    .and_then(BootstrapStatus::parse)
                    .unwrap_or(BootstrapStatus::Complete),
                progress: 100,
                baseline_count: count_field(record, "baseline_count"),
                event_count: count_field(record, "event_count"),
                last_completed: Some(
                    record
                        .field_str("bootstrap_timestamp")
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map_or(record.timestamp, |t| t.with_timezone(&Utc)),
                ),
            },
        );

        info!(
            baselines = restored.len(),
            insights = restored_insights.len(),
            bootstrap = state.status.as_str(),
            "Memory restored"
        );
        *self.baselines.write().await = restored;
        *self.insights.write().await = restored_insights;
        if !self.is_bootstrap_running() {
            self.bootstrap_state.store(Arc::new(state));
        }
        Ok(())
    }
}

fn count_field(record: &MeasurementRecord, key: &str) -> usize {
    record
        .fields
        .get(key)
        .and_then(store::FieldValue::as_i64)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(0)
}

fn events_summary(events: &[HistoricalEvent], now: DateTime<Utc>) -> Insight {
    let critical = events
        .iter()
        .filter(|e| e.severity >= crate::alerts::Severity::Critical)
        .count();
    Insight::statistical(
        KnowledgeType::Event,
        format!(
            "{} historical events in bootstrap window ({} critical, {} warning)",
            events.len(),
            critical,
            events.len() - critical
        ),
        InsightConfidence::Medium,
        now,
    )
}
