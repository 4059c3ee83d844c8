//! Memory manager integration tests
//!
//! Bootstrap exclusivity, insight accumulation, stale baseline refresh and
//! persistence through a real sled store.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_test::assert_err;

use common::{midweek_noon, running, running_at_load, SlowStore};
use powertrain_analyst::baseline::PeriodType;
use powertrain_analyst::load_band::{LoadBand, LoadBandClassifier};
use powertrain_analyst::memory::{
    BootstrapStatus, InsightQuery, MemoryError, MemoryManager, MemorySettings,
};
use powertrain_analyst::store::{InMemoryStore, Measurement, MetricStore, SledStore};
use powertrain_analyst::types::{Insight, InsightConfidence, KnowledgeType, MetricKind};

#[tokio::test(start_paused = true)]
async fn concurrent_bootstraps_run_exactly_once() {
    let inner = Arc::new(InMemoryStore::default());
    let now = midweek_noon();
    inner
        .insert_samples((0..30).map(|i| running(now - Duration::minutes(i), 300.0)))
        .unwrap();
    let store = Arc::new(SlowStore::new(Arc::clone(&inner), std::time::Duration::from_secs(2)));
    let memory = MemoryManager::new(store, MemorySettings::default());

    let (first, second) = tokio::join!(
        memory.bootstrap_at(now - Duration::days(30), now),
        memory.bootstrap_at(now - Duration::days(30), now),
    );

    let results = [first, second];
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(MemoryError::BootstrapAlreadyRunning)))
        .count();
    assert_eq!(rejected, 1, "exactly one caller must be turned away");
    let completed = results.iter().find(|r| r.is_ok()).unwrap().as_ref().unwrap();
    assert_eq!(completed.status, BootstrapStatus::Complete);
    assert!(!memory.is_bootstrap_running());

    // Only the winning run wrote anything
    assert_eq!(inner.records(Measurement::Baselines).len(), completed.baseline_count);
    let completions = |store: &InMemoryStore| {
        store
            .records(Measurement::SystemStatus)
            .iter()
            .filter(|r| r.field_bool("bootstrap_completed") == Some(true))
            .count()
    };
    assert_eq!(completions(&inner), 1);

    // Once the first run is over a new one is accepted again
    assert!(memory.bootstrap_at(now - Duration::days(30), now).await.is_ok());
    assert_eq!(completions(&inner), 2);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_rejected_while_another_is_in_flight() {
    let inner = Arc::new(InMemoryStore::default());
    let store = Arc::new(SlowStore::new(inner, std::time::Duration::from_secs(2)));
    let memory = Arc::new(MemoryManager::new(store, MemorySettings::default()));

    let background = {
        let memory = Arc::clone(&memory);
        tokio::spawn(async move { memory.bootstrap().await })
    };
    tokio::task::yield_now().await;
    assert!(memory.is_bootstrap_running());
    assert_eq!(memory.bootstrap_state().status, BootstrapStatus::InProgress);

    assert_err!(memory.bootstrap().await);

    let outcome = background.await.unwrap().unwrap();
    assert_eq!(outcome.status, BootstrapStatus::CompletedNoBaselines);
}

#[tokio::test]
async fn recorded_insights_are_all_retrievable_in_order() {
    let store = Arc::new(InMemoryStore::default());
    let memory = MemoryManager::new(store, MemorySettings::default());
    let now = Utc::now();

    for i in 0..25 {
        let kind = if i % 2 == 0 {
            KnowledgeType::Trend
        } else {
            KnowledgeType::Pattern
        };
        let insight = Insight::statistical(
            kind,
            format!("observation {i}"),
            InsightConfidence::Medium,
            now - Duration::minutes(25 - i),
        )
        .in_band(LoadBand::Heavy);
        memory.record_insight(insight).await.unwrap();
    }

    assert_eq!(memory.insight_count().await, 25);
    let all = memory.query_insights(&InsightQuery::default(), now).await;
    assert_eq!(all.len(), 25);
    assert_eq!(all[0].description, "observation 0");
    assert_eq!(all[24].description, "observation 24");

    let trends = memory
        .query_insights(
            &InsightQuery {
                knowledge_type: Some(KnowledgeType::Trend),
                ..InsightQuery::default()
            },
            now,
        )
        .await;
    assert_eq!(trends.len(), 13);

    let other_band = memory
        .query_insights(
            &InsightQuery {
                load_band: Some(LoadBand::Light),
                ..InsightQuery::default()
            },
            now,
        )
        .await;
    assert!(other_band.is_empty());
}

#[tokio::test]
async fn only_stale_baselines_are_recomputed() {
    let store = Arc::new(InMemoryStore::default());
    let memory = MemoryManager::new(store.clone(), MemorySettings::default());
    let now = Utc::now();
    let eight_days_ago = now - Duration::days(8);
    let one_day_ago = now - Duration::days(1);

    // Seed NORMAL eight days ago and HEAVY yesterday
    memory
        .fold_sample(&running(eight_days_ago, 300.0), LoadBand::Normal, eight_days_ago)
        .await
        .unwrap();
    memory
        .fold_sample(
            &running_at_load(one_day_ago, 70.0, 290.0),
            LoadBand::Heavy,
            one_day_ago,
        )
        .await
        .unwrap();

    // Fresh telemetry for both bands in the last half hour
    store
        .insert_samples((0..12).flat_map(|i| {
            let ts = now - Duration::minutes(i * 2);
            [
                running(ts, 310.0 + i as f64),
                running_at_load(ts + Duration::seconds(30), 70.0, 295.0),
            ]
        }))
        .unwrap();

    let refreshed = memory.refresh_band(LoadBand::Normal, now).await.unwrap();
    assert_eq!(refreshed, PeriodType::ALL.len());
    let normal = memory.baseline(LoadBand::Normal, PeriodType::Hourly).await.unwrap();
    assert_eq!(normal.computed_at, now);
    assert_eq!(normal.sample_count, 12);

    let untouched = memory.refresh_band(LoadBand::Heavy, now).await.unwrap();
    assert_eq!(untouched, 0);
    let heavy = memory.baseline(LoadBand::Heavy, PeriodType::Daily).await.unwrap();
    assert_eq!(heavy.computed_at, one_day_ago);
    assert_eq!(heavy.sample_count, 1);
}

#[tokio::test]
async fn stopped_band_is_never_baselined() {
    let store = Arc::new(InMemoryStore::default());
    let memory = MemoryManager::new(store, MemorySettings::default());
    let now = Utc::now();

    let folded = memory
        .fold_sample(&common::stopped(now), LoadBand::Stopped, now)
        .await
        .unwrap();
    assert_eq!(folded, 0);
    assert!(!memory
        .refresh_baseline_if_stale(LoadBand::Stopped, PeriodType::Daily, now)
        .await
        .unwrap());
    assert!(memory.baselines().await.is_empty());
}

#[tokio::test]
async fn memory_survives_restart_on_sled() {
    let dir = tempfile::tempdir().unwrap();
    let now = midweek_noon();
    let classifier = LoadBandClassifier::default();

    let (baselines, insight_count) = {
        let sled = Arc::new(SledStore::open(dir.path(), classifier).unwrap());
        for i in 0..40 {
            let power = if i % 2 == 0 { 50.0 } else { 85.0 };
            sled.insert_sample(&running_at_load(
                now - Duration::minutes(i),
                power,
                300.0 - i as f64 * 0.5,
            ))
            .unwrap();
        }
        let store: Arc<dyn MetricStore> = sled.clone();
        let memory = MemoryManager::new(store, MemorySettings::default());
        let outcome = memory.bootstrap_at(now - Duration::days(30), now).await.unwrap();
        assert_eq!(outcome.status, BootstrapStatus::Complete);

        memory
            .record_insight(Insight::ai(
                KnowledgeType::Pattern,
                "Load peaks follow the shift change",
                now,
            ))
            .await
            .unwrap();
        sled.flush().await.unwrap();
        (memory.baselines().await, memory.insight_count().await)
    };
    assert!(!baselines.is_empty());

    let sled = Arc::new(SledStore::open(dir.path(), classifier).unwrap());
    let memory = MemoryManager::new(sled, MemorySettings::default());
    memory.restore(now).await.unwrap();

    let restored = memory.baselines().await;
    assert_eq!(restored.len(), baselines.len());
    for (before, after) in baselines.iter().zip(&restored) {
        assert_eq!(before.key(), after.key());
        assert_eq!(before.sample_count, after.sample_count);
        assert_eq!(before.confidence, after.confidence);
        let (b, a) = (
            before.metrics[&MetricKind::OilPressure].mean(),
            after.metrics[&MetricKind::OilPressure].mean(),
        );
        assert!((b - a).abs() < 1e-9, "oil mean drifted: {b} vs {a}");
    }
    assert_eq!(memory.insight_count().await, insight_count);
    let state = memory.bootstrap_state();
    assert_eq!(state.status, BootstrapStatus::Complete);
    assert_eq!(state.baseline_count, baselines.len());
}
