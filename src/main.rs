//! Powertrain Analyst service
//!
//! # Usage
//!
//! ```bash
//! # Defaults, or ./analyst_config.toml if present
//! powertrain-analyst
//!
//! # Explicit config, JSON logs, bootstrap immediately
//! powertrain-analyst --config /etc/analyst/analyst_config.toml --log-format json --bootstrap-on-start
//! ```
//!
//! # Environment Variables
//!
//! - `ANALYST_CONFIG`: config file path when `--config` is not given
//! - `ANALYST_AI_API_KEY`: bearer token for the AI endpoint (name configurable)
//! - `ANALYST_CORS_ORIGINS`: comma-separated origins allowed to call the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use powertrain_analyst::api::{create_app, ApiState};
use powertrain_analyst::config::AnalystConfig;
use powertrain_analyst::enrichment::{AiHealthMonitor, AiState, DisabledEnricher, Enricher, HttpEnricher};
use powertrain_analyst::load_band::LoadBandClassifier;
use powertrain_analyst::memory::{MemoryManager, MemorySettings};
use powertrain_analyst::scheduler::AnalystScheduler;
use powertrain_analyst::store::{MetricStore, SledStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "powertrain-analyst")]
#[command(about = "Load-band-aware powertrain health analyst for diesel generators")]
#[command(version)]
struct CliArgs {
    /// Path to analyst_config.toml (otherwise ANALYST_CONFIG, then ./analyst_config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `[store] path`
    #[arg(long, value_name = "DIR")]
    store_path: Option<PathBuf>,

    /// Override `[server] addr` (e.g. "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the analysis interval in minutes (1-30)
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long, value_enum, default_value = "text", env = "ANALYST_LOG_FORMAT")]
    log_format: LogFormat,

    /// Run a full bootstrap as soon as the scheduler starts
    #[arg(long)]
    bootstrap_on_start: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

fn load_config(args: &CliArgs) -> Result<AnalystConfig> {
    let mut config = match &args.config {
        Some(path) => AnalystConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AnalystConfig::load(),
    };

    if let Some(path) = &args.store_path {
        config.store.path.clone_from(path);
    }
    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    if let Some(minutes) = args.interval {
        config.scheduler.interval_minutes = minutes;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Scheduler,
    AiHealthMonitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::Scheduler => write!(f, "Scheduler"),
            Self::AiHealthMonitor => write!(f, "AiHealthMonitor"),
        }
    }
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await
            .context("HTTP server error")?;
        info!("[HttpServer] Graceful shutdown complete");
        Ok(TaskName::HttpServer)
    });
}

/// Monitor tasks until shutdown. Any task ending, cleanly or not, stops
/// the service; the rest get `grace` to wind down.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
    grace: Duration,
) -> Result<()> {
    info!(tasks = task_set.len(), "Supervisor: all tasks spawned, monitoring");
    let mut failure = None;

    tokio::select! {
        () = cancel_token.cancelled() => info!("Supervisor: shutdown signal received"),
        result = task_set.join_next() => {
            match result {
                Some(Ok(Ok(task))) => info!(task = %task, "Supervisor: task finished, shutting down"),
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Supervisor: task failed");
                    failure = Some(e);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Supervisor: task panicked");
                    failure = Some(anyhow::anyhow!("Task panicked: {e}"));
                }
                None => info!("Supervisor: no tasks left"),
            }
            cancel_token.cancel();
        }
    }

    let drain = async {
        while let Some(result) = task_set.join_next().await {
            match result {
                Ok(Ok(task)) => info!(task = %task, "Task stopped"),
                Ok(Err(e)) => warn!(error = %e, "Task stopped with error"),
                Err(e) => warn!(error = %e, "Task panicked during shutdown"),
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "Tasks still running after grace period, aborting");
        task_set.abort_all();
    }

    failure.map_or(Ok(()), Err)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_format);

    let config = load_config(&args)?;
    info!(
        generator = %config.generator.name,
        rated_rpm = config.generator.rated_rpm,
        rated_kw = config.generator.rated_kw,
        interval_minutes = config.scheduler.interval_minutes,
        "Powertrain Analyst starting"
    );

    // Store
    let classifier = LoadBandClassifier::new(config.generator.rated_kw);
    let sled = Arc::new(
        SledStore::open(&config.store.path, classifier)
            .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?,
    );
    info!(
        path = %config.store.path.display(),
        samples = sled.sample_count(),
        size_bytes = sled.size_bytes(),
        "Store opened"
    );
    let store: Arc<dyn MetricStore> = sled.clone();

    // Memory
    let memory = Arc::new(MemoryManager::new(store, MemorySettings::from_config(&config)));
    if let Err(e) = memory.restore(Utc::now()).await {
        warn!(error = %e, "Could not restore memory from store, starting empty");
    }

    // Enrichment
    let enricher: Option<Arc<dyn Enricher>> = match &config.enrichment.endpoint {
        Some(_) => match HttpEnricher::from_config(&config.enrichment, config.scheduler.call_timeout()) {
            Ok(e) => Some(Arc::new(e) as Arc<dyn Enricher>),
            Err(e) => {
                warn!(error = %e, "AI enricher unavailable, running local analysis only");
                None
            }
        },
        None => None,
    };
    let ai = AiState::gate(config.enrichment.enabled && enricher.is_some());
    let scheduler_enricher = enricher
        .clone()
        .unwrap_or_else(|| Arc::new(DisabledEnricher) as Arc<dyn Enricher>);

    let (scheduler, handle) =
        AnalystScheduler::new(&config, Arc::clone(&memory), scheduler_enricher, Arc::clone(&ai));
    if args.bootstrap_on_start {
        if let Err(e) = handle.trigger_bootstrap() {
            warn!(error = %e, "Could not queue startup bootstrap");
        }
    }

    // HTTP
    let app = create_app(ApiState::new(handle));
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.addr))?;
    info!(addr = %config.server.addr, "HTTP API listening on /api/v1");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    let scheduler_cancel = cancel_token.clone();
    task_set.spawn(async move {
        scheduler.run(scheduler_cancel).await;
        Ok(TaskName::Scheduler)
    });

    if let Some(enricher) = enricher {
        let monitor = AiHealthMonitor::new(
            enricher,
            ai,
            config.scheduler.ai_health_interval(),
            config.scheduler.call_timeout(),
            config.scheduler.ai_failure_limit,
        );
        let monitor_cancel = cancel_token.clone();
        task_set.spawn(async move {
            monitor.run(monitor_cancel).await;
            Ok(TaskName::AiHealthMonitor)
        });
    }

    let result = run_supervisor(&mut task_set, cancel_token, config.scheduler.shutdown_timeout()).await;

    if let Err(e) = sled.flush().await {
        error!(error = %e, "Failed to flush store");
    }
    info!("Powertrain Analyst stopped");
    result
}
