use crate::models::HealthResponse;
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let bus_available = state.bus.is_available();
    let store_available = state.store.is_available();
    let cache_available = state.cache.cache().is_available();

    // The cache alone going away only slows reads down
    let (status, code) = if bus_available && store_available {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(HealthResponse {
            status,
            bus_available,
            store_available,
            cache_available,
            partitions: state.bus.partition_count(),
        }),
    )
}

/// Prometheus text exposition of gateway, pipeline, cache and store counters
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut extra = std::collections::BTreeMap::new();

    for (name, value) in state.pipeline_metrics.export() {
        extra.insert(format!("pipeline_{name}"), value);
    }
    for (reason, count) in state.pipeline_metrics.rejection_reasons() {
        extra.insert(format!("pipeline_rejections_{reason}"), count);
    }

    let cache = state.cache.stats().await;
    extra.insert("cache_entries".into(), cache.entries as u64);
    extra.insert("cache_evictions".into(), cache.evictions);
    extra.insert("cache_propagated".into(), cache.propagated);
    extra.insert("cache_ignored_stale".into(), cache.ignored_stale);
    extra.insert("cache_lag_violations".into(), cache.lag_violations);
    extra.insert("cache_dropped".into(), cache.dropped);
    extra.insert("cache_overflowed".into(), cache.overflowed);
    extra.insert("cache_max_lag_ns".into(), cache.max_lag_ns.max(0) as u64);

    let store = state.store.stats();
    extra.insert("store_keys".into(), store.keys as u64);
    extra.insert("store_records".into(), store.records as u64);
    extra.insert("store_commits".into(), store.commits);
    extra.insert("store_stale_rejections".into(), store.stale_rejections);

    let bus = state.bus.stats();
    extra.insert("bus_published".into(), bus.published);
    extra.insert("bus_rejected_unavailable".into(), bus.rejected_unavailable);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(&extra),
    )
}
