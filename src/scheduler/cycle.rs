//! One analysis cycle
//!
//! ```text
//! latest sample ─► band ─┬─ STOPPED ─► non-load alerts ─► heartbeat      (PAUSED)
//!                        └─ running ─► baseline upkeep ─► trends ─► alerts
//!                                      ─► events ─► fold ─► AI narrative
//!                                      ─► records                         (ACTIVE)
//! ```
//!
//! An ACTIVE agent that sees the engine stop keeps running non-load checks
//! as ACTIVE until the idle timeout has passed, then pauses.
//!
//! A sample already seen by an earlier cycle is graded again but does not
//! extend escalation streaks, fold into baselines or raise events. Once it
//! is older than one interval the snapshot is marked stale.
//!
//! A store that cannot be reached makes the cycle OFFLINE. Any other store
//! failure skips the cycle. Either way the snapshot is marked stale and the
//! next interval retries.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{AgentState, AnalysisMode, AnalystScheduler, StatusSnapshot};
use crate::alerts::{CycleAlerts, CycleInput, Severity};
use crate::baseline::Baseline;
use crate::enrichment::{EnrichmentContext, EnrichmentError};
use crate::load_band::LoadBand;
use crate::memory::{
    extract_ai_insights, BaselineAction, HistoricalEvent, InsightQuery, MemoryError,
};
use crate::stats::{analyze_trend, StatsError, TrendAnalysis};
use crate::store::{self, Measurement, MeasurementRecord};
use crate::types::{Insight, InsightConfidence, KnowledgeType, MetricKind, MetricSample};

/// R² above which a live trend insight is reported with high confidence
const HIGH_CONFIDENCE_R_SQUARED: f64 = 0.7;

/// Insights handed to the AI as recent context
const RECENT_INSIGHT_HOURS: u64 = 24;
const RECENT_INSIGHT_LIMIT: usize = 5;

/// Raw sample retention is enforced at most this often
const PRUNE_EVERY_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Analyzed {
        load_band: LoadBand,
        overall: Severity,
        mode: AnalysisMode,
    },
    /// Engine stopped or no telemetry yet
    Paused,
    /// Engine stopped within the idle timeout; the agent stays ACTIVE
    Idle,
    /// Store unreachable
    Offline { reason: String },
    /// Store answered with an error; nothing was updated
    Skipped { reason: String },
}

impl AnalystScheduler {
    pub(crate) async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.cycle_count += 1;
        match self.try_cycle(now).await {
            Ok(outcome) => {
                self.prune_if_due(now).await;
                outcome
            }
            Err(e) if e.is_store_unavailable() => {
                if self.state != AgentState::Offline {
                    warn!(error = %e, "Metric store unreachable, going OFFLINE");
                }
                self.state = AgentState::Offline;
                self.publish_failure(&e);
                CycleOutcome::Offline {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cycle skipped after store error");
                self.publish_failure(&e);
                CycleOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, MemoryError> {
        let store = Arc::clone(self.memory.store());
        let latest = store::with_timeout(self.settings.call_timeout, store.latest_sample()).await?;

        let Some(sample) = latest else {
            debug!("No telemetry yet");
            self.enter(AgentState::Paused);
            self.write_heartbeat(None, now).await?;
            self.publish(None, &MetricSample::new(now), CycleAlerts::default(), AnalysisMode::Local, now);
            return Ok(CycleOutcome::Paused);
        };

        let fresh = self.last_classified.map_or(true, |t| sample.timestamp > t);

        let band = self.memory.settings().classifier.classify_sample(&sample);
        if band.is_stopped() {
            return self.stopped_cycle(&sample, fresh, now).await;
        }
        if let Some(since) = self.idle_since.take() {
            info!(idle_minutes = (now - since).num_minutes(), "Engine running again");
        }
        self.enter(AgentState::Active);

        match self.memory.baseline_action(band, now).await {
            BaselineAction::FullBootstrap => {
                info!("Baselines missing or stale, starting bootstrap");
                self.spawn_bootstrap();
            }
            BaselineAction::RefreshBand(b) => {
                let refreshed = self.memory.refresh_band(b, now).await?;
                debug!(band = %b, refreshed, "Band baselines checked");
            }
            BaselineAction::None => {}
        }

        let trends = self.analyze_trends(band, now).await?;
        self.record_trend_changes(band, &trends, now).await?;

        let baseline = self.memory.reference_baseline(band).await;
        let alerts = self.classifier.classify(
            &CycleInput {
                sample: &sample,
                load_band: band,
                baseline: baseline.as_ref(),
                trends: &trends,
                paused: false,
                fresh,
            },
            now,
        );
        self.last_classified = Some(sample.timestamp);

        if fresh {
            for event in alerts
                .alerts
                .iter()
                .filter_map(|a| HistoricalEvent::from_alert(a, sample.timestamp))
            {
                self.memory.record_event(event).await?;
            }
        }

        if self.last_folded.map_or(true, |t| sample.timestamp > t) {
            self.memory.fold_sample(&sample, band, now).await?;
            self.last_folded = Some(sample.timestamp);
        }

        let (mode, narrative) = self
            .enrich(&sample, band, &alerts, baseline.as_ref(), now)
            .await?;

        let mut record = MeasurementRecord::new(Measurement::Analysis, now)
            .tag("load_band", band.as_str())
            .tag("alert_level", alerts.overall.as_str())
            .tag("mode", mode.as_str())
            .field("analysis_summary", alerts.summary())
            .field("shutdown_recommended", alerts.shutdown_recommended)
            .field("alert_count", alerts.alerts.len());
        for (metric, value) in &sample.readings {
            record = record.field(metric.field_name(), *value);
        }
        if let Some(text) = narrative {
            record = record.field("ai_analysis", text);
        }
        store::with_timeout(self.settings.call_timeout, store.write(record)).await?;
        self.write_heartbeat(Some(band), now).await?;

        if alerts.overall >= Severity::Warning {
            warn!(
                band = %band,
                level = alerts.overall.as_str(),
                shutdown = alerts.shutdown_recommended,
                summary = %alerts.summary(),
                "Powertrain alert"
            );
        } else {
            info!(band = %band, level = alerts.overall.as_str(), mode = mode.as_str(), "Cycle complete");
        }

        let overall = alerts.overall;
        self.publish(Some(band), &sample, alerts, mode, now);
        Ok(CycleOutcome::Analyzed {
            load_band: band,
            overall,
            mode,
        })
    }

    /// Engine stopped: heartbeat plus checks that do not depend on load.
    /// Baselines and insights are left alone. An ACTIVE agent only pauses
    /// once the engine has been stopped for the idle timeout.
    async fn stopped_cycle(
        &mut self,
        sample: &MetricSample,
        fresh: bool,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, MemoryError> {
        let idle_since = match self.idle_since {
            Some(since) => since,
            None => {
                if self.state == AgentState::Active {
                    info!(
                        timeout_secs = self.settings.idle_timeout.num_seconds(),
                        "Engine stopped, idle timer started"
                    );
                }
                self.idle_since = Some(now);
                now
            }
        };
        let idle = self.state == AgentState::Active && now - idle_since < self.settings.idle_timeout;
        if !idle {
            if self.state == AgentState::Active {
                info!(idle_minutes = (now - idle_since).num_minutes(), "Engine idle past timeout, pausing");
            }
            self.enter(AgentState::Paused);
        }

        let alerts = self.classifier.classify(
            &CycleInput {
                sample,
                load_band: LoadBand::Stopped,
                baseline: None,
                trends: &[],
                paused: true,
                fresh,
            },
            now,
        );
        self.last_classified = Some(sample.timestamp);
        if alerts.overall >= Severity::Warning {
            warn!(summary = %alerts.summary(), "Alert while engine stopped");
        }
        self.write_heartbeat(Some(LoadBand::Stopped), now).await?;
        self.publish(Some(LoadBand::Stopped), sample, alerts, AnalysisMode::Local, now);
        Ok(if idle { CycleOutcome::Idle } else { CycleOutcome::Paused })
    }

    /// Enforce raw sample retention once a day. Failures are retried on the
    /// next cycle and never fail the current one.
    async fn prune_if_due(&mut self, now: DateTime<Utc>) {
        if self
            .last_pruned
            .is_some_and(|t| now - t < Duration::hours(PRUNE_EVERY_HOURS))
        {
            return;
        }
        match self.memory.prune_history(now).await {
            Ok(_) => self.last_pruned = Some(now),
            Err(e) => warn!(error = %e, "Retention prune failed"),
        }
    }

    fn enter(&mut self, next: AgentState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Agent state changed");
            self.state = next;
        }
    }

    async fn analyze_trends(
        &self,
        band: LoadBand,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendAnalysis>, MemoryError> {
        let store = self.memory.store();
        let start = now - self.settings.trend_window;
        let mut trends = Vec::new();

        for metric in MetricKind::ANALYZED {
            let series = store::with_timeout(
                self.settings.call_timeout,
                store.query_window(metric, start, now, true),
            )
            .await?;
            let points: Vec<(DateTime<Utc>, f64)> = series
                .iter()
                .filter(|p| p.load_band == Some(band))
                .map(|p| (p.timestamp, p.value))
                .collect();

            match analyze_trend(metric, band, &points) {
                Ok(trend) => trends.push(trend),
                Err(StatsError::InsufficientData { got, .. }) => {
                    debug!(metric = %metric, points = got, "Not enough points for trend");
                }
                Err(e) => debug!(metric = %metric, error = %e, "Trend check skipped"),
            }
        }
        Ok(trends)
    }

    /// Record a STAT insight for each significant trend whose direction
    /// differs from what was last reported for that band and metric.
    async fn record_trend_changes(
        &mut self,
        band: LoadBand,
        trends: &[TrendAnalysis],
        now: DateTime<Utc>,
    ) -> Result<(), MemoryError> {
        for trend in trends {
            let previous = self
                .last_trend_directions
                .insert((band, trend.metric), trend.direction);
            if !trend.significant || previous == Some(trend.direction) {
                continue;
            }
            let confidence = if trend.r_squared > HIGH_CONFIDENCE_R_SQUARED {
                InsightConfidence::High
            } else {
                InsightConfidence::Medium
            };
            let insight = Insight::statistical(KnowledgeType::Trend, trend.describe(), confidence, now)
                .in_band(band)
                .supported_by(trend.metric, trend.slope);
            self.memory.record_insight(insight).await?;
        }
        Ok(())
    }

    /// Ask the enricher for a narrative when AI is on. Failures count toward
    /// the breaker and fall back to a LOCAL cycle.
    async fn enrich(
        &self,
        sample: &MetricSample,
        band: LoadBand,
        alerts: &CycleAlerts,
        baseline: Option<&Baseline>,
        now: DateTime<Utc>,
    ) -> Result<(AnalysisMode, Option<String>), MemoryError> {
        if !self.ai.read().await.enabled {
            return Ok((AnalysisMode::Local, None));
        }

        let query = InsightQuery {
            since_hours: Some(RECENT_INSIGHT_HOURS),
            ..InsightQuery::default()
        };
        let recent = self.memory.query_insights(&query, now).await;
        let recent = &recent[recent.len().saturating_sub(RECENT_INSIGHT_LIMIT)..];
        let context =
            EnrichmentContext::build(&self.settings.generator, sample, band, alerts, baseline, recent);

        let result = match tokio::time::timeout(self.settings.call_timeout, self.enricher.enrich(&context)).await {
            Ok(r) => r,
            Err(_) => Err(EnrichmentError::Unavailable(format!(
                "enrichment timed out after {}s",
                self.settings.call_timeout.as_secs()
            ))),
        };

        match result {
            Ok(narrative) => {
                self.ai.write().await.record_success(now);
                let insights = extract_ai_insights(&narrative, now);
                debug!(extracted = insights.len(), "AI narrative merged");
                for insight in insights {
                    self.memory.record_insight(insight.in_band(band)).await?;
                }
                Ok((AnalysisMode::Ai, Some(narrative)))
            }
            Err(e) => {
                let mut gate = self.ai.write().await;
                let tripped = gate.record_failure(&e, self.settings.ai_failure_limit, now);
                warn!(error = %e, failures = gate.consecutive_failures, "AI enrichment failed, using local analysis");
                if tripped {
                    info!(
                        failures = gate.consecutive_failures,
                        "AI enrichment auto-disabled after consecutive failures"
                    );
                }
                Ok((AnalysisMode::Local, None))
            }
        }
    }

    async fn write_heartbeat(&self, band: Option<LoadBand>, now: DateTime<Utc>) -> Result<(), MemoryError> {
        let mut record = MeasurementRecord::new(Measurement::SystemStatus, now)
            .tag("status_type", "heartbeat")
            .field("alert_level", "HEARTBEAT")
            .field("state", self.state.as_str())
            .field("ai_enabled", self.ai.read().await.enabled);
        if let Some(band) = band {
            record = record.field("load_band", band.as_str());
        }
        let store = self.memory.store();
        store::with_timeout(self.settings.call_timeout, store.write(record)).await?;
        Ok(())
    }

    fn publish(
        &self,
        band: Option<LoadBand>,
        sample: &MetricSample,
        alerts: CycleAlerts,
        mode: AnalysisMode,
        now: DateTime<Utc>,
    ) {
        let bootstrap = self.memory.bootstrap_state();
        let previous = self.snapshot.load();
        let readings: BTreeMap<MetricKind, f64> = sample.readings.clone();
        let sample_at = band.map(|_| sample.timestamp);
        let stale = sample_at.is_some_and(|t| now - t > self.settings.sample_age_limit());
        if stale {
            debug!(sample_at = %sample.timestamp, "Newest sample is older than one interval");
        }
        self.snapshot.store(Arc::new(StatusSnapshot {
            generator: self.settings.generator.clone(),
            state: self.state,
            bootstrap_status: bootstrap.status,
            bootstrap_progress: bootstrap.progress,
            load_band: band,
            readings,
            overall: alerts.overall,
            shutdown_recommended: alerts.shutdown_recommended,
            alerts: alerts.alerts,
            ai_enabled: previous.ai_enabled,
            mode,
            interval_minutes: self.settings.interval_minutes,
            heartbeat: Some(now),
            sample_at,
            cycle_count: self.cycle_count,
            stale,
            last_error: None,
        }));
    }

    /// Keep the last good data but flag it
    fn publish_failure(&self, error: &MemoryError) {
        let state = self.state;
        let cycle_count = self.cycle_count;
        let message = error.to_string();
        self.snapshot.rcu(|s| StatusSnapshot {
            state,
            cycle_count,
            stale: true,
            last_error: Some(message.clone()),
            ..StatusSnapshot::clone(s)
        });
    }
}
