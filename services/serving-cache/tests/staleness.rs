//! Bounded staleness between store commits and cache visibility

use rust_decimal::Decimal;
use serving_cache::{CacheConfig, CacheLayer, FeatureCache};
use std::sync::Arc;
use std::time::{Duration, Instant};
use feature_store::{CommitOutcome, VersionedStore};
use types::feature::{FeatureValues, FeatureVector, Timeliness};
use types::ids::{EntityId, FeatureKey, FeatureSetId};
use types::time::SystemClock;

fn vector(entity: &str, version: u64) -> FeatureVector {
    let mut values = FeatureValues::new();
    values.insert("rating_count".into(), Decimal::from(version));
    FeatureVector::new(
        EntityId::new(entity),
        FeatureSetId::new("user_rating_stats"),
        values,
        version,
        version as i64,
        Timeliness::OnTime,
    )
}

fn key(entity: &str) -> FeatureKey {
    FeatureKey::new(EntityId::new(entity), FeatureSetId::new("user_rating_stats"))
}

fn committed(outcome: CommitOutcome) -> types::record::StoreRecord {
    match outcome {
        CommitOutcome::Committed(record) => record,
        other => panic!("expected commit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_commit_visible_within_staleness_budget() {
    let config = CacheConfig::default();
    let budget = config.max_propagation_lag;
    let layer = CacheLayer::start(config, Arc::new(SystemClock));
    let store = VersionedStore::in_memory();

    let record = committed(store.apply_commit(vector("u1", 1)).unwrap());
    let started = Instant::now();
    layer.propagate(record);

    loop {
        if let Some(entry) = layer.get(&key("u1")).await.unwrap() {
            assert_eq!(entry.version(), 1);
            break;
        }
        assert!(started.elapsed() < budget, "record not visible within budget");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let stats = layer.stats().await;
    assert_eq!(stats.propagated, 1);
    assert_eq!(stats.lag_violations, 0);
}

#[tokio::test]
async fn test_cache_never_ahead_of_store() {
    let layer = CacheLayer::start(CacheConfig::with_capacity(4), Arc::new(SystemClock));
    let store = VersionedStore::in_memory();

    for version in 1..=20u64 {
        let entity = format!("u{}", version % 3);
        let outcome = store.apply_commit(vector(&entity, version)).unwrap();
        if let CommitOutcome::Committed(record) = outcome {
            layer.propagate(record);
        }
        for id in ["u0", "u1", "u2"] {
            let cached = layer.get(&key(id)).await.unwrap().map(|e| e.version());
            let stored = store.latest(&key(id)).unwrap().map(|r| r.version());
            if let Some(cached) = cached {
                assert!(Some(cached) <= stored, "cache {cached} ahead of store {stored:?}");
            }
        }
    }
}

#[tokio::test]
async fn test_late_propagation_does_not_regress_fill() {
    let layer = CacheLayer::start(CacheConfig::default(), Arc::new(SystemClock));
    let store = VersionedStore::in_memory();

    let first = committed(store.apply_commit(vector("u1", 1)).unwrap());
    let second = committed(store.apply_commit(vector("u1", 2)).unwrap());

    // The gateway filled version 2 before the propagation of version 1 ran
    layer.fill(second).await.unwrap();
    layer.propagate(first);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let entry = layer.get(&key("u1")).await.unwrap().unwrap();
    assert_eq!(entry.version(), 2);
}
