//! AI Enrichment
//!
//! An optional narrative layer on top of the local statistical analysis.
//! The scheduler hands an [`EnrichmentContext`] to an [`Enricher`] after
//! each ACTIVE cycle and mines the returned text for trend and pattern
//! insights.
//!
//! - [`HttpEnricher`]: OpenAI-compatible `/chat/completions` endpoint
//! - [`DisabledEnricher`]: always unavailable; used when `[enrichment]` is off
//! - [`AiHealthMonitor`]: pings the enricher and turns the AI toggle off
//!   after repeated failures

mod health;
mod http;

pub use health::{AiGate, AiHealth, AiHealthMonitor, AiState};
pub use http::HttpEnricher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

use crate::alerts::{CycleAlerts, Severity};
use crate::baseline::Baseline;
use crate::load_band::LoadBand;
use crate::types::{Insight, MetricKind, MetricSample};

#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    /// The backend could not produce a narrative. Counts toward auto-disable.
    #[error("enrichment unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for EnrichmentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Everything the narrative model sees about one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentContext {
    pub generator: String,
    pub load_band: LoadBand,
    pub readings: Vec<(MetricKind, f64)>,
    pub overall: Severity,
    pub alerts: Vec<String>,
    /// One line per metric: baseline mean and spread for this band
    pub baseline: Vec<String>,
    pub recent_insights: Vec<String>,
}

impl EnrichmentContext {
    pub fn build(
        generator: &str,
        sample: &MetricSample,
        load_band: LoadBand,
        alerts: &CycleAlerts,
        baseline: Option<&Baseline>,
        recent_insights: &[Insight],
    ) -> Self {
        let readings = MetricKind::ALL
            .iter()
            .filter_map(|m| sample.get(*m).map(|v| (*m, v)))
            .collect();
        let baseline = baseline
            .map(|b| {
                b.metrics
                    .iter()
                    .map(|(metric, stats)| {
                        format!(
                            "{}: {:.1} ± {:.1} {} ({} samples, {})",
                            metric.label(),
                            stats.mean(),
                            stats.std_dev(),
                            metric.unit(),
                            stats.sample_count(),
                            b.period_type
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            generator: generator.to_string(),
            load_band,
            readings,
            overall: alerts.overall,
            alerts: alerts
                .alerts
                .iter()
                .map(|a| format!("[{}] {}", a.severity, a.description))
                .collect(),
            baseline,
            recent_insights: recent_insights.iter().map(Insight::tagged_text).collect(),
        }
    }

    /// Render the user prompt sent to the model
    pub fn prompt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Generator {} is running in the {} load band ({}). Local status: {}.",
            self.generator,
            self.load_band,
            self.load_band.range_label(),
            self.overall
        );

        out.push_str("\nCurrent readings:\n");
        for (metric, value) in &self.readings {
            let _ = writeln!(out, "- {}: {:.1} {}", metric.label(), value, metric.unit());
        }

        if !self.baseline.is_empty() {
            out.push_str("\nBaseline for this load band:\n");
            for line in &self.baseline {
                let _ = writeln!(out, "- {line}");
            }
        }
        if !self.alerts.is_empty() {
            out.push_str("\nAlerts raised this cycle:\n");
            for line in &self.alerts {
                let _ = writeln!(out, "- {line}");
            }
        }
        if !self.recent_insights.is_empty() {
            out.push_str("\nRecent findings:\n");
            for line in &self.recent_insights {
                let _ = writeln!(out, "- {line}");
            }
        }

        out.push_str(
            "\nAssess powertrain health. Call out any trend in oil pressure or other \
             readings and any recurring pattern, one finding per line.",
        );
        out
    }
}

/// Narrative backend for cycle enrichment
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, context: &EnrichmentContext) -> Result<String, EnrichmentError>;

    /// Cheap reachability check used by the health monitor
    async fn ping(&self) -> Result<(), EnrichmentError>;

    fn backend_name(&self) -> &'static str;
}

/// Stand-in when enrichment is not configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEnricher;

#[async_trait]
impl Enricher for DisabledEnricher {
    async fn enrich(&self, _context: &EnrichmentContext) -> Result<String, EnrichmentError> {
        Err(EnrichmentError::Unavailable("enrichment disabled".to_string()))
    }

    async fn ping(&self) -> Result<(), EnrichmentError> {
        Err(EnrichmentError::Unavailable("enrichment disabled".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}
