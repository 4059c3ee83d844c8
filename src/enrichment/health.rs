//! AI health monitor: a small circuit breaker around the enricher.
//!
//! The scheduler reads the AI toggle through the same [`AiGate`] the
//! monitor writes, so an auto-disable takes effect on the next cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EnrichmentError, Enricher};

/// Shared AI toggle plus failure bookkeeping
pub type AiGate = Arc<RwLock<AiState>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AiState {
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Turned off by the breaker rather than by an operator
    pub auto_disabled: bool,
}

impl AiState {
    pub fn gate(enabled: bool) -> AiGate {
        Arc::new(RwLock::new(Self {
            enabled,
            ..Self::default()
        }))
    }

    /// Operator toggle. Clears the failure count either way.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.consecutive_failures = 0;
        self.auto_disabled = false;
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_checked = Some(now);
    }

    /// Count a failure. Returns true when this failure tripped the breaker.
    pub fn record_failure(&mut self, error: &EnrichmentError, limit: u32, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.last_checked = Some(now);
        if self.enabled && self.consecutive_failures >= limit {
            self.enabled = false;
            self.auto_disabled = true;
            return true;
        }
        false
    }
}

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiHealth {
    Healthy,
    Degraded { reason: String },
    /// Toggle is off; nothing was pinged
    Disabled,
}

impl std::fmt::Display for AiHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded { reason } => write!(f, "DEGRADED: {reason}"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

pub struct AiHealthMonitor {
    enricher: Arc<dyn Enricher>,
    gate: AiGate,
    interval: Duration,
    call_timeout: Duration,
    failure_limit: u32,
}

impl AiHealthMonitor {
    pub fn new(
        enricher: Arc<dyn Enricher>,
        gate: AiGate,
        interval: Duration,
        call_timeout: Duration,
        failure_limit: u32,
    ) -> Self {
        Self {
            enricher,
            gate,
            interval,
            call_timeout,
            failure_limit,
        }
    }

    /// Ping the enricher once, if the toggle is on.
    pub async fn check_once(&self) -> AiHealth {
        if !self.gate.read().await.enabled {
            return AiHealth::Disabled;
        }

        let result = match tokio::time::timeout(self.call_timeout, self.enricher.ping()).await {
            Ok(r) => r,
            Err(_) => Err(EnrichmentError::Unavailable(format!(
                "ping timed out after {}s",
                self.call_timeout.as_secs()
            ))),
        };

        let now = Utc::now();
        let mut state = self.gate.write().await;
        match result {
            Ok(()) => {
                state.record_success(now);
                debug!(backend = self.enricher.backend_name(), "AI backend healthy");
                AiHealth::Healthy
            }
            Err(e) => {
                let tripped = state.record_failure(&e, self.failure_limit, now);
                warn!(
                    backend = self.enricher.backend_name(),
                    failures = state.consecutive_failures,
                    error = %e,
                    "AI backend health check failed"
                );
                if tripped {
                    info!(
                        failures = state.consecutive_failures,
                        "AI enrichment auto-disabled after consecutive failures"
                    );
                }
                AiHealth::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Ping every `interval` until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            backend = self.enricher.backend_name(),
            "AI health monitor started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {
                    let health = self.check_once().await;
                    debug!(status = %health, "AI health check");
                }
            }
        }
        info!("AI health monitor stopped");
    }
}
