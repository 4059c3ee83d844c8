//! Agent Scheduler
//!
//! Drives analysis cycles on a timer and owns the agent state machine.
//!
//! ## Architecture
//!
//! - [`AnalystScheduler`] runs on its own task. Cycles are single-file: the
//!   timer is re-armed only after a cycle returns.
//! - [`SchedulerHandle`] is the cheap, cloneable front door used by the API.
//!   Commands are non-blocking sends into a bounded channel, and status reads
//!   come from an `ArcSwap` snapshot that never blocks.
//! - Bootstrap runs as a separate task guarded inside [`MemoryManager`].
//! - The AI toggle lives in an [`AiGate`] shared with the health monitor.

mod command;
mod cycle;
mod state;

pub use command::{validate_interval, Command, CommandError};
pub use cycle::CycleOutcome;
pub use state::{AgentState, AnalysisMode, StatusSnapshot};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::AlertClassifier;
use crate::config::defaults::COMMAND_CHANNEL_CAPACITY;
use crate::config::AnalystConfig;
use crate::enrichment::{AiGate, Enricher};
use crate::load_band::LoadBand;
use crate::memory::{MemoryError, MemoryManager};
use crate::stats::TrendDirection;
use crate::types::MetricKind;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub generator: String,
    pub interval_minutes: u64,
    pub call_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub trend_window: chrono::Duration,
    pub ai_failure_limit: u32,
    /// How long an ACTIVE agent waits with the engine stopped before pausing
    pub idle_timeout: chrono::Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &AnalystConfig) -> Self {
        Self {
            generator: config.generator.name.clone(),
            interval_minutes: config.scheduler.interval_minutes,
            call_timeout: config.scheduler.call_timeout(),
            shutdown_timeout: config.scheduler.shutdown_timeout(),
            trend_window: config.baseline.trend_window(),
            ai_failure_limit: config.scheduler.ai_failure_limit,
            idle_timeout: config.scheduler.idle_timeout(),
        }
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// A latest sample older than one interval makes the snapshot stale
    pub fn sample_age_limit(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::try_from(self.interval_minutes).unwrap_or(i64::from(u16::MAX)))
    }
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    snapshot: Arc<ArcSwap<StatusSnapshot>>,
    memory: Arc<MemoryManager>,
    ai: AiGate,
}

impl SchedulerHandle {
    /// Latest snapshot with live bootstrap progress and AI flag overlaid
    pub async fn status(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::clone(&self.snapshot.load());
        let bootstrap = self.memory.bootstrap_state();
        snapshot.bootstrap_status = bootstrap.status;
        snapshot.bootstrap_progress = bootstrap.progress;
        snapshot.ai_enabled = self.ai.read().await.enabled;
        snapshot
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn ai_gate(&self) -> &AiGate {
        &self.ai
    }

    pub fn send(&self, command: Command) -> Result<(), CommandError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CommandError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CommandError::Closed,
        })
    }

    pub fn trigger_bootstrap(&self) -> Result<(), CommandError> {
        if self.memory.is_bootstrap_running() {
            return Err(CommandError::BootstrapAlreadyRunning);
        }
        self.send(Command::TriggerBootstrap)
    }

    pub fn force_analysis(&self) -> Result<(), CommandError> {
        self.send(Command::ForceAnalysis)
    }

    /// Rejected synchronously when outside 1..=30 minutes
    pub fn set_interval(&self, minutes: u64) -> Result<(), CommandError> {
        self.send(Command::SetInterval(validate_interval(minutes)?))
    }

    pub fn set_ai_enabled(&self, enabled: bool) -> Result<(), CommandError> {
        self.send(Command::SetAiEnabled(enabled))
    }

    pub fn shutdown(&self) -> Result<(), CommandError> {
        self.send(Command::Shutdown)
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct AnalystScheduler {
    settings: SchedulerSettings,
    memory: Arc<MemoryManager>,
    enricher: Arc<dyn Enricher>,
    ai: AiGate,
    classifier: AlertClassifier,
    rx: mpsc::Receiver<Command>,
    snapshot: Arc<ArcSwap<StatusSnapshot>>,
    state: AgentState,
    cycle_count: u64,
    /// Newest sample already folded into baselines
    last_folded: Option<DateTime<Utc>>,
    /// Newest sample already graded; repeats do not extend streaks
    last_classified: Option<DateTime<Utc>>,
    /// When the engine was first seen stopped in the current idle spell
    idle_since: Option<DateTime<Utc>>,
    last_pruned: Option<DateTime<Utc>>,
    /// Last reported direction per (band, metric); insights fire on change
    last_trend_directions: HashMap<(LoadBand, MetricKind), TrendDirection>,
    bootstrap_task: Option<JoinHandle<()>>,
}

impl AnalystScheduler {
    /// Create the scheduler and its handle
    pub fn new(
        config: &AnalystConfig,
        memory: Arc<MemoryManager>,
        enricher: Arc<dyn Enricher>,
        ai: AiGate,
    ) -> (Self, SchedulerHandle) {
        let settings = SchedulerSettings::from_config(config);
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let snapshot = Arc::new(ArcSwap::from_pointee(StatusSnapshot::initial(
            &settings.generator,
            settings.interval_minutes,
            config.enrichment.enabled,
        )));

        let scheduler = Self {
            classifier: AlertClassifier::new(config.thresholds.clone(), config.generator.rated_rpm),
            settings,
            memory: Arc::clone(&memory),
            enricher,
            ai: Arc::clone(&ai),
            rx,
            snapshot: Arc::clone(&snapshot),
            state: AgentState::Offline,
            cycle_count: 0,
            last_folded: None,
            last_classified: None,
            idle_since: None,
            last_pruned: None,
            last_trend_directions: HashMap::new(),
            bootstrap_task: None,
        };
        let handle = SchedulerHandle {
            tx,
            snapshot,
            memory,
            ai,
        };
        (scheduler, handle)
    }

    pub const fn state(&self) -> AgentState {
        self.state
    }

    /// Run until cancelled or told to shut down. The first cycle runs
    /// immediately.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            generator = %self.settings.generator,
            interval_minutes = self.settings.interval_minutes,
            enricher = self.enricher.backend_name(),
            "Analyst scheduler started"
        );

        let mut next_cycle = Instant::now();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(Command::ForceAnalysis) => {
                        info!("Forced analysis requested");
                        if self.cycle_or_shutdown(&cancel).await {
                            break;
                        }
                        next_cycle = Instant::now() + self.settings.interval();
                    }
                    Some(Command::SetInterval(minutes)) => {
                        self.settings.interval_minutes = minutes;
                        self.snapshot.rcu(|s| StatusSnapshot {
                            interval_minutes: minutes,
                            ..StatusSnapshot::clone(s)
                        });
                        next_cycle = Instant::now() + self.settings.interval();
                        info!(interval_minutes = minutes, "Analysis interval changed");
                    }
                    Some(Command::SetAiEnabled(enabled)) => {
                        self.ai.write().await.set_enabled(enabled);
                        info!(enabled, "AI enrichment toggled");
                    }
                    Some(Command::TriggerBootstrap) => self.spawn_bootstrap(),
                },
                () = tokio::time::sleep_until(next_cycle) => {
                    if self.cycle_or_shutdown(&cancel).await {
                        break;
                    }
                    next_cycle = Instant::now() + self.settings.interval();
                }
            }
        }

        self.stop().await;
    }

    /// Run one cycle. Returns true if shutdown was requested while it ran;
    /// the in-flight cycle then gets at most the shutdown timeout to finish.
    async fn cycle_or_shutdown(&mut self, cancel: &CancellationToken) -> bool {
        let limit = self.settings.shutdown_timeout;
        let cycle = self.run_cycle(Utc::now());
        tokio::pin!(cycle);
        tokio::select! {
            outcome = &mut cycle => {
                debug!(outcome = ?outcome, "Cycle finished");
                false
            }
            () = cancel.cancelled() => {
                if tokio::time::timeout(limit, cycle).await.is_err() {
                    warn!(timeout_secs = limit.as_secs(), "In-flight cycle abandoned at shutdown");
                }
                true
            }
        }
    }

    pub(crate) fn spawn_bootstrap(&mut self) {
        if self.memory.is_bootstrap_running() {
            debug!("Bootstrap already running, not spawning another");
            return;
        }
        let memory = Arc::clone(&self.memory);
        self.bootstrap_task = Some(tokio::spawn(async move {
            match memory.bootstrap().await {
                Ok(outcome) => debug!(status = outcome.status.as_str(), "Bootstrap task done"),
                Err(MemoryError::BootstrapAlreadyRunning) => {
                    debug!("Bootstrap raced with another run");
                }
                Err(e) => warn!(error = %e, "Bootstrap task failed"),
            }
        }));
    }

    async fn stop(&mut self) {
        if let Some(task) = self.bootstrap_task.take() {
            if !task.is_finished() {
                info!("Waiting for running bootstrap");
                let abort = task.abort_handle();
                if tokio::time::timeout(self.settings.shutdown_timeout, task).await.is_err() {
                    warn!("Bootstrap did not finish before shutdown timeout, aborting");
                    abort.abort();
                }
            }
        }
        self.state = AgentState::Offline;
        self.snapshot.rcu(|s| StatusSnapshot {
            state: AgentState::Offline,
            ..StatusSnapshot::clone(s)
        });
        info!(cycles = self.cycle_count, "Analyst scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{AiState, DisabledEnricher};
    use crate::memory::MemorySettings;
    use crate::store::InMemoryStore;

    fn handle() -> (AnalystScheduler, SchedulerHandle) {
        let store = Arc::new(InMemoryStore::default());
        let memory = Arc::new(MemoryManager::new(store, MemorySettings::default()));
        AnalystScheduler::new(
            &AnalystConfig::default(),
            memory,
            Arc::new(DisabledEnricher),
            AiState::gate(false),
        )
    }

    #[tokio::test]
    async fn test_set_interval_validated_before_send() {
        let (_scheduler, handle) = handle();
        assert_eq!(handle.set_interval(0), Err(CommandError::InvalidInterval(0)));
        assert_eq!(handle.set_interval(31), Err(CommandError::InvalidInterval(31)));
        assert!(handle.set_interval(15).is_ok());
    }

    #[tokio::test]
    async fn test_send_after_scheduler_dropped_is_closed() {
        let (scheduler, handle) = handle();
        drop(scheduler);
        assert_eq!(handle.force_analysis(), Err(CommandError::Closed));
    }

    #[tokio::test]
    async fn test_initial_status_offline() {
        let (_scheduler, handle) = handle();
        let status = handle.status().await;
        assert_eq!(status.state, AgentState::Offline);
        assert_eq!(status.interval_minutes, 5);
        assert!(!status.ai_enabled);
    }
}
