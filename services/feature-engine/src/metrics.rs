//! Ingestion pipeline counters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct PipelineMetrics {
    pub events_applied: AtomicU64,
    pub out_of_order: AtomicU64,
    pub duplicates: AtomicU64,
    pub redeliveries_skipped: AtomicU64,
    pub validation_failures: AtomicU64,
    pub vectors_committed: AtomicU64,
    pub stale_rejections: AtomicU64,
    pub commit_retries: AtomicU64,
    pub bus_retries: AtomicU64,
    pub checkpoints: AtomicU64,
    pub lane_restores: AtomicU64,
    pub entities_evicted: AtomicU64,
    /// Validation failures by reason code
    pub rejection_reasons: Mutex<BTreeMap<&'static str, u64>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rejection(&self, code: &'static str) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut reasons) = self.rejection_reasons.lock() {
            *reasons.entry(code).or_insert(0) += 1;
        }
    }

    /// Flat name → value view for exposition
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("events_applied".to_string(), self.events_applied.load(Ordering::Relaxed));
        m.insert("out_of_order".to_string(), self.out_of_order.load(Ordering::Relaxed));
        m.insert("duplicates".to_string(), self.duplicates.load(Ordering::Relaxed));
        m.insert(
            "redeliveries_skipped".to_string(),
            self.redeliveries_skipped.load(Ordering::Relaxed),
        );
        m.insert(
            "validation_failures".to_string(),
            self.validation_failures.load(Ordering::Relaxed),
        );
        m.insert(
            "vectors_committed".to_string(),
            self.vectors_committed.load(Ordering::Relaxed),
        );
        m.insert("stale_rejections".to_string(), self.stale_rejections.load(Ordering::Relaxed));
        m.insert("commit_retries".to_string(), self.commit_retries.load(Ordering::Relaxed));
        m.insert("bus_retries".to_string(), self.bus_retries.load(Ordering::Relaxed));
        m.insert("checkpoints".to_string(), self.checkpoints.load(Ordering::Relaxed));
        m.insert("lane_restores".to_string(), self.lane_restores.load(Ordering::Relaxed));
        m.insert(
            "entities_evicted".to_string(),
            self.entities_evicted.load(Ordering::Relaxed),
        );
        m
    }

    pub fn rejection_reasons(&self) -> BTreeMap<&'static str, u64> {
        self.rejection_reasons
            .lock()
            .map(|reasons| reasons.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_grouped_by_reason() {
        let metrics = PipelineMetrics::new();
        metrics.record_rejection("rating_step");
        metrics.record_rejection("rating_step");
        metrics.record_rejection("missing_field");

        assert_eq!(metrics.export()["validation_failures"], 3);
        let reasons = metrics.rejection_reasons();
        assert_eq!(reasons["rating_step"], 2);
        assert_eq!(reasons["missing_field"], 1);
    }
}
