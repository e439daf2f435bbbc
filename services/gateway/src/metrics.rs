//! Observability for the retrieval gateway
//!
//! Per-call latency, cache hit/miss, store fallbacks, degraded answers,
//! staleness age and rejection reasons, exported as Prometheus text.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Core metrics for the retrieval gateway.
pub struct GatewayMetrics {
    // Resolve path
    pub resolves: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_errors: AtomicU64,
    pub store_reads: AtomicU64,
    pub store_errors: AtomicU64,
    pub not_found: AtomicU64,
    pub degraded: AtomicU64,
    pub timeouts: AtomicU64,
    pub unavailable: AtomicU64,
    pub resolve_latency_ns: Mutex<LatencyTracker>,
    /// Age of served vectors relative to their store commit
    pub staleness_ns: Mutex<LatencyTracker>,

    // Ingest path
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub rate_limited: AtomicU64,
    pub rejection_reasons: Mutex<BTreeMap<&'static str, u64>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            resolves: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
            store_reads: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            resolve_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            staleness_ns: Mutex::new(LatencyTracker::new(1000)),
            events_accepted: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            rejection_reasons: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one finished resolve call.
    pub fn record_resolve(&self, latency_ns: u64) {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.resolve_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Record the age of a vector handed to a caller.
    pub fn record_staleness(&self, age_ns: i64) {
        if let Ok(mut tracker) = self.staleness_ns.lock() {
            tracker.record(age_ns.max(0) as u64);
        }
    }

    pub fn record_rejection(&self, code: &'static str) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut reasons) = self.rejection_reasons.lock() {
            *reasons.entry(code).or_insert(0) += 1;
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        let counters = [
            ("resolves", &self.resolves),
            ("cache_hits", &self.cache_hits),
            ("cache_misses", &self.cache_misses),
            ("cache_errors", &self.cache_errors),
            ("store_reads", &self.store_reads),
            ("store_errors", &self.store_errors),
            ("not_found", &self.not_found),
            ("degraded", &self.degraded),
            ("timeouts", &self.timeouts),
            ("unavailable", &self.unavailable),
            ("events_accepted", &self.events_accepted),
            ("events_rejected", &self.events_rejected),
            ("rate_limited", &self.rate_limited),
        ];
        for (name, counter) in counters {
            m.insert(name.to_string(), counter.load(Ordering::Relaxed));
        }
        m
    }

    pub fn rejection_reasons(&self) -> BTreeMap<&'static str, u64> {
        self.rejection_reasons
            .lock()
            .map(|reasons| reasons.clone())
            .unwrap_or_default()
    }

    /// Render gateway counters plus any extra `(name, value)` pairs in the
    /// Prometheus text exposition format.
    pub fn render_prometheus(&self, extra: &BTreeMap<String, u64>) -> String {
        let mut out = String::new();

        for (name, value) in self.export() {
            let _ = writeln!(out, "# TYPE feature_gateway_{name} counter");
            let _ = writeln!(out, "feature_gateway_{name} {value}");
        }

        let reasons = self.rejection_reasons();
        if !reasons.is_empty() {
            let _ = writeln!(out, "# TYPE feature_gateway_rejections counter");
            for (reason, count) in reasons {
                let _ = writeln!(out, "feature_gateway_rejections{{reason=\"{reason}\"}} {count}");
            }
        }

        for (metric, tracker) in [
            ("resolve_latency_ns", &self.resolve_latency_ns),
            ("staleness_ns", &self.staleness_ns),
        ] {
            let Ok(tracker) = tracker.lock() else {
                continue;
            };
            let _ = writeln!(out, "# TYPE feature_gateway_{metric} summary");
            for (quantile, p) in [("0.5", 50), ("0.95", 95), ("0.99", 99)] {
                if let Some(value) = tracker.percentile(p) {
                    let _ = writeln!(
                        out,
                        "feature_gateway_{metric}{{quantile=\"{quantile}\"}} {value}"
                    );
                }
            }
            let _ = writeln!(out, "feature_gateway_{metric}_count {}", tracker.count());
        }

        for (name, value) in extra {
            let _ = writeln!(out, "# TYPE feature_{name} gauge");
            let _ = writeln!(out, "feature_{name} {value}");
        }

        out
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
