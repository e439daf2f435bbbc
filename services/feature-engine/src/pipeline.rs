//! Ingestion pipeline: bus → lane → store → cache
//!
//! One [`LaneWorker`] per partition. A worker never commits a bus offset
//! before the vectors of every event below it are committed to the store
//! and the lane checkpoint covering them is written. Checkpoint reads and
//! writes run on the blocking pool.

use crate::checkpoint::{CheckpointPolicy, CheckpointStore, LaneCheckpoint};
use crate::engine::FeatureEngine;
use crate::error::EngineError;
use crate::lane::{Lane, LaneOutcome};
use crate::metrics::PipelineMetrics;
use crate::retry::{RetryError, RetryPolicy};
use event_bus::{Delivery, EventBus, Subscription};
use feature_store::{CommitOutcome, FeatureStore};
use serving_cache::FeatureCache;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::errors::Transient;
use types::feature::FeatureVector;
use types::time::Clock;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Consumer group whose offsets the pipeline commits
    pub group: String,
    pub checkpoint: CheckpointPolicy,
    pub retry: RetryPolicy,
    /// Evict aggregates with no event newer than this before each periodic
    /// checkpoint; `None` keeps every entity resident
    pub idle_eviction: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            group: "feature-engine".to_string(),
            checkpoint: CheckpointPolicy::default(),
            retry: RetryPolicy::default(),
            idle_eviction: None,
        }
    }
}

/// Collaborators shared by every lane worker
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn FeatureStore>,
    pub cache: Arc<dyn FeatureCache>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub clock: Arc<dyn Clock>,
    pub config: PipelineConfig,
}

// ── Lane Worker ─────────────────────────────────────────────────────

pub struct LaneWorker {
    lane: Lane,
    subscription: Subscription,
    ctx: PipelineContext,
    /// Applied offset covered by the last checkpoint
    checkpointed: u64,
}

impl LaneWorker {
    pub fn new(lane: Lane, subscription: Subscription, ctx: PipelineContext) -> Self {
        Self {
            lane,
            subscription,
            ctx,
            checkpointed: 0,
        }
    }

    pub fn lane(&self) -> &Lane {
        &self.lane
    }

    pub fn partition(&self) -> u32 {
        self.lane.partition()
    }

    /// Load the newest checkpoint and position the subscription right after
    /// it. Without a checkpoint the lane replays the retained log from its
    /// start.
    pub fn recover(&mut self) -> Result<(), EngineError> {
        let checkpoint = self.ctx.checkpoints.load(self.partition())?;
        self.resume_from(checkpoint)
    }

    fn resume_from(&mut self, checkpoint: Option<LaneCheckpoint>) -> Result<(), EngineError> {
        match checkpoint {
            Some(checkpoint) => {
                let offset = checkpoint.next_offset;
                self.lane.restore(checkpoint)?;
                self.subscription.seek(offset);
                self.checkpointed = offset;
            }
            None => {
                self.lane.reset();
                self.subscription.seek(0);
                self.checkpointed = 0;
                info!(partition = self.partition(), "no checkpoint, replaying from log start");
            }
        }
        Ok(())
    }

    /// Consume until `shutdown` flips to true (or its sender is dropped),
    /// then write a final checkpoint.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        info!(partition = self.partition(), "lane worker started");
        loop {
            let delivery = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                delivery = self.next_delivery() => delivery,
            };

            match delivery {
                Ok(delivery) => {
                    if let Err(e) = self.process(delivery).await {
                        error!(partition = self.partition(), error = %e, "lane worker failed");
                        return Err(e);
                    }
                }
                Err(e) => {
                    error!(partition = self.partition(), error = %e, "subscription failed");
                    return Err(e);
                }
            }
        }

        if self.lane.applied_offset() > self.checkpointed {
            self.checkpoint().await?;
        }
        info!(
            partition = self.partition(),
            applied_offset = self.lane.applied_offset(),
            "lane worker stopped"
        );
        Ok(())
    }

    /// Wait for the next delivery, backing off while the bus is unreachable
    pub async fn next_delivery(&mut self) -> Result<Delivery, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self.subscription.next().await {
                Ok(delivery) => return Ok(delivery),
                Err(e) if e.is_transient() => {
                    let delay = self.ctx.config.retry.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    self.ctx.metrics.bus_retries.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        partition = self.partition(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "bus unavailable"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply one delivery and commit its vectors; checkpoint when due
    pub async fn process(&mut self, delivery: Delivery) -> Result<(), EngineError> {
        let metrics = self.ctx.metrics.clone();
        match self.lane.apply(delivery.offset, &delivery.event) {
            LaneOutcome::Applied(vectors) => {
                metrics.events_applied.fetch_add(1, Ordering::Relaxed);
                if vectors.iter().any(FeatureVector::is_out_of_order) {
                    metrics.out_of_order.fetch_add(1, Ordering::Relaxed);
                }
                for vector in vectors {
                    match self.commit(vector, delivery.offset).await {
                        Ok(()) => {}
                        Err(EngineError::RetriesExhausted { attempts, last }) => {
                            warn!(
                                partition = self.partition(),
                                offset = delivery.offset,
                                attempts,
                                error = %last,
                                "store unreachable, rewinding lane to last checkpoint"
                            );
                            return self.rewind().await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            LaneOutcome::Duplicate { version } => {
                metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(
                    partition = self.partition(),
                    offset = delivery.offset,
                    entity_id = %delivery.event.entity_id,
                    version,
                    "duplicate delivery ignored"
                );
            }
            LaneOutcome::AlreadyApplied => {
                metrics.redeliveries_skipped.fetch_add(1, Ordering::Relaxed);
            }
            LaneOutcome::Rejected(e) => {
                metrics.record_rejection(e.code());
            }
        }

        let interval = self.ctx.config.checkpoint.interval.max(1);
        if self.lane.applied_offset() >= self.checkpointed.saturating_add(interval) {
            self.evict_idle();
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Drop aggregates idle for longer than the configured window
    pub fn evict_idle(&mut self) -> usize {
        let Some(idle) = self.ctx.config.idle_eviction else {
            return 0;
        };
        let idle_ns = i64::try_from(idle.as_nanos()).unwrap_or(i64::MAX);
        let before = self.ctx.clock.now_nanos().saturating_sub(idle_ns);
        let evicted = self.lane.evict_idle(before);
        if evicted > 0 {
            self.ctx
                .metrics
                .entities_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Write the lane checkpoint, then record the bus offset it covers
    pub async fn checkpoint(&mut self) -> Result<(), EngineError> {
        let checkpoint = self.lane.checkpoint();
        let next_offset = checkpoint.next_offset;
        let store = self.ctx.checkpoints.clone();
        let timestamp = self.ctx.clock.now_nanos();
        tokio::task::spawn_blocking(move || store.save(&checkpoint, timestamp))
            .await
            .map_err(|e| EngineError::CheckpointUnavailable(format!("checkpoint task failed: {e}")))??;
        self.checkpointed = next_offset;
        self.ctx.metrics.checkpoints.fetch_add(1, Ordering::Relaxed);

        // A failed offset commit only widens the replay window
        if let Err(e) = self.subscription.commit(next_offset) {
            warn!(
                partition = self.partition(),
                next_offset,
                error = %e,
                "bus offset commit failed"
            );
        }
        Ok(())
    }

    async fn commit(&self, vector: FeatureVector, offset: u64) -> Result<(), EngineError> {
        let store = self.ctx.store.clone();
        let metrics = self.ctx.metrics.clone();
        let result = self
            .ctx
            .config
            .retry
            .run(
                "store commit",
                || {
                    let store = store.clone();
                    let vector = vector.clone();
                    async move { store.commit(vector).await }
                },
                |_, _| {
                    metrics.commit_retries.fetch_add(1, Ordering::Relaxed);
                },
            )
            .await;

        match result {
            Ok(CommitOutcome::Committed(record)) => {
                self.ctx.metrics.vectors_committed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    partition = self.partition(),
                    offset,
                    entity_id = %record.vector.entity_id,
                    feature_set = %record.vector.feature_set_id,
                    version = record.version(),
                    "committed"
                );
                self.ctx.cache.propagate(record);
                Ok(())
            }
            Ok(CommitOutcome::Rejected(stale)) => {
                self.ctx.metrics.stale_rejections.fetch_add(1, Ordering::Relaxed);
                info!(
                    partition = self.partition(),
                    offset,
                    entity_id = %vector.entity_id,
                    feature_set = %vector.feature_set_id,
                    attempted = stale.attempted,
                    current = stale.current,
                    "stale commit discarded"
                );
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(EngineError::RetriesExhausted {
                attempts,
                last: last.to_string(),
            }),
            Err(RetryError::Permanent(e)) => Err(e.into()),
        }
    }

    /// Roll the lane back to its last checkpoint and re-consume from there.
    /// Already committed versions are rejected as stale on the way forward.
    async fn rewind(&mut self) -> Result<(), EngineError> {
        self.ctx.metrics.lane_restores.fetch_add(1, Ordering::Relaxed);
        let store = self.ctx.checkpoints.clone();
        let partition = self.partition();
        let checkpoint = tokio::task::spawn_blocking(move || store.load(partition))
            .await
            .map_err(|e| EngineError::CheckpointUnavailable(format!("checkpoint task failed: {e}")))??;
        self.resume_from(checkpoint)
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Running set of lane workers, one per bus partition
pub struct Pipeline {
    workers: Vec<JoinHandle<Result<(), EngineError>>>,
    shutdown: watch::Sender<bool>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Subscribe every partition, recover each lane, and spawn its worker
    pub fn spawn(
        bus: &EventBus,
        engine: Arc<FeatureEngine>,
        ctx: PipelineContext,
    ) -> Result<Self, EngineError> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();

        for partition in 0..bus.partition_count() {
            let subscription = bus.subscribe(&ctx.config.group, partition)?;
            let lane = Lane::new(partition, engine.clone());
            let mut worker = LaneWorker::new(lane, subscription, ctx.clone());
            worker.recover()?;
            workers.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        info!(
            group = %ctx.config.group,
            lanes = workers.len(),
            "ingestion pipeline started"
        );
        Ok(Self {
            workers,
            shutdown,
            metrics: ctx.metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn lanes(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker, wait for their final checkpoints, and return the
    /// first failure
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let _ = self.shutdown.send(true);
        let mut first_error = None;
        for worker in self.workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join) => {
                    error!(error = %join, "lane worker panicked");
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
