//! Request handlers for `/api/v1`

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::baseline::Baseline;
use crate::load_band::LoadBand;
use crate::memory::{HistoricalEvent, InsightQuery};
use crate::scheduler::{AgentState, CommandError, SchedulerHandle};
use crate::store;
use crate::types::{Insight, KnowledgeType, MetricKind, MetricSample};

/// Shared state for all handlers
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: SchedulerHandle,
}

impl ApiState {
    pub const fn new(scheduler: SchedulerHandle) -> Self {
        Self { scheduler }
    }
}

// ============================================================================
// Response and request types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent_state: AgentState,
    pub store_backend: &'static str,
    pub store_reachable: bool,
    pub ai_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub command: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub minutes: u64,
}

#[derive(Debug, Deserialize)]
pub struct AiToggleRequest {
    pub enabled: bool,
}

/// One controller sample, readings keyed by store field name
/// (`oil_pressure`, `coolant_temp`, ...)
#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    /// Time of receipt when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub readings: BTreeMap<String, f64>,
}

/// Body of `POST /samples`: a single sample or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestRequest {
    Batch(Vec<SampleRequest>),
    Single(SampleRequest),
}

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub ingested: usize,
    pub latest: Option<DateTime<Utc>>,
}

fn command_error(err: &CommandError) -> Response {
    match err {
        CommandError::InvalidInterval(_) => ApiErrorResponse::bad_request(err.to_string()),
        CommandError::BootstrapAlreadyRunning => ApiErrorResponse::conflict(err.to_string()),
        CommandError::QueueFull | CommandError::Closed => {
            ApiErrorResponse::service_unavailable(err.to_string())
        }
    }
}

fn accepted(result: Result<(), CommandError>, command: &'static str) -> Response {
    match result {
        Ok(()) => ApiResponse::accepted(CommandAccepted { command }),
        Err(e) => command_error(&e),
    }
}

/// Parse `knowledge_type`, `load_band` and `since_hours` from the query string
fn parse_insight_query(params: &HashMap<String, String>) -> Result<InsightQuery, String> {
    let mut query = InsightQuery::default();
    if let Some(raw) = params.get("knowledge_type").filter(|s| !s.is_empty()) {
        query.knowledge_type =
            Some(KnowledgeType::parse(raw).ok_or_else(|| format!("unknown knowledge_type '{raw}'"))?);
    }
    if let Some(raw) = params.get("load_band").filter(|s| !s.is_empty()) {
        query.load_band = Some(LoadBand::parse(raw).ok_or_else(|| format!("unknown load_band '{raw}'"))?);
    }
    if let Some(raw) = params.get("since_hours").filter(|s| !s.is_empty()) {
        query.since_hours = Some(
            raw.parse()
                .map_err(|_| format!("since_hours must be a non-negative integer, got '{raw}'"))?,
        );
    }
    Ok(query)
}

/// Turn posted samples into `MetricSample`s. Rejects the whole request on
/// an empty batch, an empty sample, an unknown field or a non-finite value.
fn parse_samples(request: IngestRequest, received_at: DateTime<Utc>) -> Result<Vec<MetricSample>, String> {
    let requests = match request {
        IngestRequest::Batch(batch) => batch,
        IngestRequest::Single(one) => vec![one],
    };
    if requests.is_empty() {
        return Err("no samples in request".to_string());
    }

    let mut samples = Vec::with_capacity(requests.len());
    for (i, request) in requests.into_iter().enumerate() {
        if request.readings.is_empty() {
            return Err(format!("sample {i} has no readings"));
        }
        let mut sample = MetricSample::new(request.timestamp.unwrap_or(received_at));
        for (name, value) in request.readings {
            let metric = MetricKind::from_field_name(&name)
                .ok_or_else(|| format!("sample {i}: unknown metric '{name}'"))?;
            if !value.is_finite() {
                return Err(format!("sample {i}: {name} must be a finite number"));
            }
            sample = sample.with(metric, value);
        }
        samples.push(sample);
    }
    Ok(samples)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let memory = state.scheduler.memory();
    let store = memory.store();
    let reachable = store::with_timeout(memory.settings().call_timeout, store.ping())
        .await
        .is_ok();
    let status = state.scheduler.status().await;

    ApiResponse::ok(HealthResponse {
        status: if reachable { "healthy" } else { "degraded" },
        agent_state: status.state,
        store_backend: store.backend_name(),
        store_reachable: reachable,
        ai_enabled: status.ai_enabled,
    })
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.scheduler.status().await)
}

/// GET /api/v1/insights?knowledge_type=&load_band=&since_hours=
pub async fn insights(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = match parse_insight_query(&params) {
        Ok(q) => q,
        Err(msg) => return ApiErrorResponse::bad_request(msg),
    };
    let found: Vec<Insight> = state
        .scheduler
        .memory()
        .query_insights(&query, Utc::now())
        .await;
    ApiResponse::ok(found)
}

/// GET /api/v1/baselines
pub async fn baselines(State(state): State<ApiState>) -> Response {
    let all: Vec<Baseline> = state.scheduler.memory().baselines().await;
    ApiResponse::ok(all)
}

/// GET /api/v1/events
pub async fn events(State(state): State<ApiState>) -> Response {
    let events: Vec<HistoricalEvent> = state.scheduler.memory().recent_events().await;
    ApiResponse::ok(events)
}

/// POST /api/v1/samples
pub async fn ingest_samples(
    State(state): State<ApiState>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let samples = match parse_samples(request, Utc::now()) {
        Ok(s) => s,
        Err(msg) => return ApiErrorResponse::bad_request(msg),
    };
    let memory = state.scheduler.memory();
    let store = memory.store();
    let total = samples.len();
    let latest = samples.iter().map(|s| s.timestamp).max();

    for (stored, sample) in samples.into_iter().enumerate() {
        if let Err(e) =
            store::with_timeout(memory.settings().call_timeout, store.append_sample(sample)).await
        {
            warn!(error = %e, stored, total, "Sample ingest failed");
            let msg = format!("{e} ({stored} of {total} samples stored)");
            return if e.is_retryable() {
                ApiErrorResponse::service_unavailable(msg)
            } else {
                ApiErrorResponse::internal_error(msg)
            };
        }
    }
    debug!(total, "Samples ingested");
    ApiResponse::created(IngestAccepted {
        ingested: total,
        latest,
    })
}

/// POST /api/v1/bootstrap
pub async fn trigger_bootstrap(State(state): State<ApiState>) -> Response {
    accepted(state.scheduler.trigger_bootstrap(), "trigger_bootstrap")
}

/// POST /api/v1/analysis/force
pub async fn force_analysis(State(state): State<ApiState>) -> Response {
    accepted(state.scheduler.force_analysis(), "force_analysis")
}

/// PUT /api/v1/interval
pub async fn set_interval(
    State(state): State<ApiState>,
    Json(request): Json<IntervalRequest>,
) -> Response {
    accepted(state.scheduler.set_interval(request.minutes), "set_interval")
}

/// PUT /api/v1/ai
pub async fn set_ai(State(state): State<ApiState>, Json(request): Json<AiToggleRequest>) -> Response {
    accepted(state.scheduler.set_ai_enabled(request.enabled), "set_ai_enabled")
}
