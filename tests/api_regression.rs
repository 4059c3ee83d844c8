//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! every /api/v1 endpoint using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{running, SlowStore};
use powertrain_analyst::api::{create_app, ApiState};
use powertrain_analyst::config::AnalystConfig;
use powertrain_analyst::enrichment::{AiState, DisabledEnricher};
use powertrain_analyst::load_band::LoadBand;
use powertrain_analyst::memory::{MemoryManager, MemorySettings};
use powertrain_analyst::scheduler::{AnalystScheduler, SchedulerHandle};
use powertrain_analyst::store::{InMemoryStore, Measurement, MetricStore};
use powertrain_analyst::types::{Insight, InsightConfidence, KnowledgeType};

/// App plus the scheduler it talks to. The scheduler is kept alive but not
/// run, so accepted commands stay queued.
struct TestApp {
    app: Router,
    handle: SchedulerHandle,
    _scheduler: AnalystScheduler,
}

fn test_app(store: Arc<dyn MetricStore>) -> TestApp {
    let config = AnalystConfig::default();
    let memory = Arc::new(MemoryManager::new(store, MemorySettings::from_config(&config)));
    let (scheduler, handle) = AnalystScheduler::new(
        &config,
        memory,
        Arc::new(DisabledEnricher),
        AiState::gate(false),
    );
    TestApp {
        app: create_app(ApiState::new(handle.clone())),
        handle,
        _scheduler: scheduler,
    }
}

fn in_memory_app() -> (Arc<InMemoryStore>, TestApp) {
    let store = Arc::new(InMemoryStore::default());
    let app = test_app(store.clone());
    (store, app)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

/// All GET endpoints return 200 wrapped in the success envelope.
#[tokio::test]
async fn test_get_endpoints_return_enveloped_200() {
    let (_, t) = in_memory_app();
    let endpoints = [
        "/api/v1/health",
        "/api/v1/status",
        "/api/v1/insights",
        "/api/v1/baselines",
        "/api/v1/events",
    ];

    for endpoint in &endpoints {
        let (status, json) = get(&t.app, endpoint).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
        assert!(json.get("data").is_some(), "GET {endpoint} missing data: {json}");
        assert_eq!(json["meta"]["version"], env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test]
async fn test_health_reports_store_reachability() {
    let (store, t) = in_memory_app();

    let (_, json) = get(&t.app, "/api/v1/health").await;
    assert_eq!(json["data"]["status"], "healthy");
    assert_eq!(json["data"]["store_reachable"], true);
    assert_eq!(json["data"]["store_backend"], store.backend_name());

    store.set_available(false);
    let (status, json) = get(&t.app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "degraded");
    assert_eq!(json["data"]["store_reachable"], false);
}

#[tokio::test]
async fn test_status_shape() {
    let (_, t) = in_memory_app();
    let (_, json) = get(&t.app, "/api/v1/status").await;
    let data = &json["data"];
    assert_eq!(data["state"], "OFFLINE");
    assert_eq!(data["interval_minutes"], 5);
    assert_eq!(data["ai_enabled"], false);
    assert_eq!(data["cycle_count"], 0);
}

#[tokio::test]
async fn test_insights_filtering() {
    let (_, t) = in_memory_app();
    let memory = t.handle.memory();
    let now = Utc::now();
    memory
        .record_insight(
            Insight::statistical(
                KnowledgeType::Trend,
                "Oil Pressure declining",
                InsightConfidence::High,
                now,
            )
            .in_band(LoadBand::Heavy),
        )
        .await
        .unwrap();
    memory
        .record_insight(Insight::statistical(
            KnowledgeType::Pattern,
            "Load peaks at 14:00",
            InsightConfidence::Medium,
            now - chrono::Duration::hours(72),
        ))
        .await
        .unwrap();

    let (_, all) = get(&t.app, "/api/v1/insights").await;
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let (_, trends) = get(&t.app, "/api/v1/insights?knowledge_type=trend&load_band=HEAVY").await;
    let trends = trends["data"].as_array().unwrap();
    assert_eq!(trends.len(), 1);
    assert_eq!(trends[0]["description"], "Oil Pressure declining");

    let (_, recent) = get(&t.app, "/api/v1/insights?since_hours=24").await;
    assert_eq!(recent["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_insight_query_is_400() {
    let (_, t) = in_memory_app();
    let (status, json) = get(&t.app, "/api/v1/insights?load_band=overdrive").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
    assert!(json["error"]["message"].as_str().unwrap().contains("overdrive"));
}

#[tokio::test]
async fn test_baselines_listed_after_fold() {
    let (_, t) = in_memory_app();
    let now = Utc::now();
    t.handle
        .memory()
        .fold_sample(&running(now, 300.0), LoadBand::Normal, now)
        .await
        .unwrap();

    let (_, json) = get(&t.app, "/api/v1/baselines").await;
    let baselines = json["data"].as_array().unwrap();
    assert_eq!(baselines.len(), 4);
    assert!(baselines.iter().all(|b| b["load_band"] == "NORMAL"));
}

#[tokio::test]
async fn test_commands_are_accepted() {
    let (_, t) = in_memory_app();

    let (status, json) = send(&t.app, Method::POST, "/api/v1/analysis/force", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["data"]["command"], "force_analysis");

    let (status, _) = send(&t.app, Method::POST, "/api/v1/bootstrap", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/v1/interval",
        Some(serde_json::json!({ "minutes": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(
        &t.app,
        Method::PUT,
        "/api/v1/ai",
        Some(serde_json::json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_interval_out_of_range_is_400() {
    let (_, t) = in_memory_app();
    for minutes in [0, 31] {
        let (status, json) = send(
            &t.app,
            Method::PUT,
            "/api/v1/interval",
            Some(serde_json::json!({ "minutes": minutes })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{minutes} minutes");
        assert!(json["error"]["message"].as_str().unwrap().contains("between 1 and 30"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_while_running_is_409() {
    let inner = Arc::new(InMemoryStore::default());
    let store = Arc::new(SlowStore::new(inner, Duration::from_secs(2)));
    let t = test_app(store);

    let memory = Arc::clone(t.handle.memory());
    let running_bootstrap = tokio::spawn(async move { memory.bootstrap().await });
    tokio::task::yield_now().await;

    let (status, json) = send(&t.app, Method::POST, "/api/v1/bootstrap", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    running_bootstrap.await.unwrap().unwrap();
    let (status, _) = send(&t.app, Method::POST, "/api/v1/bootstrap", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_closed_scheduler_is_503() {
    let store = Arc::new(InMemoryStore::default());
    let TestApp {
        app,
        handle,
        _scheduler: scheduler,
    } = test_app(store);
    drop(scheduler);

    let (status, json) = send(&app, Method::POST, "/api/v1/analysis/force", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "SERVICE_UNAVAILABLE");
    drop(handle);
}

/// A sample posted over HTTP drives the next cycle into ACTIVE analysis.
#[tokio::test(start_paused = true)]
async fn test_ingested_sample_drives_active_cycle() {
    let store = Arc::new(InMemoryStore::default());
    let TestApp {
        app,
        handle,
        _scheduler: scheduler,
    } = test_app(store.clone());

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/v1/samples",
        Some(serde_json::json!({
            "readings": {
                "engine_speed": 1800.0,
                "power_fraction": 50.0,
                "oil_pressure": 310.0,
                "coolant_temp": 82.0,
                "battery_voltage": 27.2
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["ingested"], 1);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (_, json) = get(&app, "/api/v1/status").await;
    let data = &json["data"];
    assert_eq!(data["state"], "ACTIVE");
    assert_eq!(data["load_band"], "NORMAL");
    assert_eq!(data["readings"]["oil_pressure"], 310.0);
    assert_eq!(data["stale"], false);

    let analysis = store.records(Measurement::Analysis);
    assert_eq!(analysis.len(), 1);
    assert_eq!(analysis[0].tag_value("load_band"), Some("NORMAL"));

    cancel.cancel();
    task.await.unwrap();
    drop(handle);
}

#[tokio::test]
async fn test_ingest_rejects_unknown_metric() {
    let (store, t) = in_memory_app();
    let (status, json) = send(
        &t.app,
        Method::POST,
        "/api/v1/samples",
        Some(serde_json::json!([
            { "readings": { "oil_pressure": 300.0 } },
            { "readings": { "turbo_boost": 1.4 } }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("turbo_boost"));
    // Nothing from a rejected batch is stored
    assert!(store.latest_sample().await.unwrap().is_none());
}

#[tokio::test]
async fn test_ingest_during_outage_is_503() {
    let (store, t) = in_memory_app();
    store.set_available(false);
    let (status, json) = send(
        &t.app,
        Method::POST,
        "/api/v1/samples",
        Some(serde_json::json!({ "readings": { "oil_pressure": 300.0 } })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"]["message"].as_str().unwrap().contains("0 of 1"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_, t) = in_memory_app();
    let (status, _) = get(&t.app, "/api/v1/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
