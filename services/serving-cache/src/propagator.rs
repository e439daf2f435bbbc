//! Background propagation from store commits to the cache
//!
//! Commit paths hand records to [`Propagator::propagate`], which never
//! blocks. A tokio task drains a bounded channel, applies each record and
//! checks the commit-to-visibility lag against the staleness budget. When
//! the queue is full the record is dropped and counted; the next
//! read-through fill repairs the key.

use crate::cache::{ApplyOutcome, ServingCache};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::record::StoreRecord;

#[derive(Clone)]
pub struct Propagator {
    tx: mpsc::Sender<StoreRecord>,
    cache: Arc<ServingCache>,
}

impl Propagator {
    /// Spawn the propagation task on the current tokio runtime
    ///
    /// The task exits once every `Propagator` clone has been dropped and the
    /// channel is drained.
    pub fn spawn(cache: Arc<ServingCache>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(cache.config().propagation_queue.max(1));
        let handle = tokio::spawn(run(cache.clone(), rx));
        (Self { tx, cache }, handle)
    }

    /// Queue a committed record for the cache
    pub fn propagate(&self, record: StoreRecord) {
        let counters = self.cache.counters();
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                counters.overflowed.fetch_add(1, Ordering::Relaxed);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %record.key(),
                    version = record.version(),
                    "propagation queue full, dropping update"
                );
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %record.key(),
                    version = record.version(),
                    "propagation channel closed, dropping update"
                );
            }
        }
    }

    pub fn cache(&self) -> &Arc<ServingCache> {
        &self.cache
    }
}

async fn run(cache: Arc<ServingCache>, mut rx: mpsc::Receiver<StoreRecord>) {
    let max_lag_ns = i64::try_from(cache.config().max_propagation_lag.as_nanos()).unwrap_or(i64::MAX);
    info!(max_lag_ms = max_lag_ns / 1_000_000, "cache propagation started");

    while let Some(record) = rx.recv().await {
        let key = record.key();
        let version = record.version();
        match cache.apply(record).await {
            Ok(ApplyOutcome::Stored(entry)) => {
                let counters = cache.counters();
                let lag = entry.propagation_lag();
                counters.propagated.fetch_add(1, Ordering::Relaxed);
                counters.record_lag(lag);
                if lag > max_lag_ns {
                    counters.lag_violations.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = %key,
                        version,
                        lag_ms = lag / 1_000_000,
                        max_lag_ms = max_lag_ns / 1_000_000,
                        "propagation exceeded staleness budget"
                    );
                } else {
                    debug!(key = %key, version, lag_ns = lag, "propagated");
                }
            }
            Ok(ApplyOutcome::IgnoredStale { cached }) => {
                debug!(key = %key, version, cached, "propagation superseded");
            }
            Err(e) => {
                // Read-through fills repopulate the key once the cache is back
                cache.counters().dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, version, error = %e, "propagation failed");
            }
        }
    }

    info!("cache propagation stopped");
}
