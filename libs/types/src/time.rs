//! Clock abstraction
//!
//! Every wall-clock timestamp in the pipeline (ingest, computed_at,
//! committed_at, propagated_at) is stamped through a [`Clock`] so tests can
//! drive time explicitly.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const NANOS_PER_DAY: i64 = 86_400 * NANOS_PER_SEC;

/// Source of Unix nanosecond timestamps
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        now_nanos()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Current Unix time in nanoseconds
pub fn now_nanos() -> i64 {
    // Saturates after year 2262
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// RFC 3339 rendering of a nanosecond timestamp, for logs and HTTP
pub fn format_nanos(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp(
        nanos.div_euclid(NANOS_PER_SEC),
        nanos.rem_euclid(NANOS_PER_SEC) as u32,
    )
    .map(|dt| dt.to_rfc3339())
    .unwrap_or_else(|| nanos.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_nanos(), 15);
        clock.set(100);
        assert_eq!(clock.now_nanos(), 100);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_nanos() > 1_577_836_800 * NANOS_PER_SEC);
    }

    #[test]
    fn test_format_nanos() {
        assert_eq!(format_nanos(0), "1970-01-01T00:00:00+00:00");
    }
}
