//! Restartable partition cursors

use crate::error::BusError;
use crate::offsets::OffsetStore;
use crate::partition::{Partition, ReadOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;
use types::event::Event;

/// One delivered event with its coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
    pub event: Event,
}

/// Lazy, infinite cursor over one partition for one consumer group.
///
/// `next` waits for new events; `seek` moves anywhere in the retained log,
/// which is how redelivery happens; `commit` durably records progress.
pub struct Subscription {
    group: String,
    partition: Arc<Partition>,
    position: u64,
    end_rx: watch::Receiver<u64>,
    offsets: Arc<OffsetStore>,
    available: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(
        group: String,
        partition: Arc<Partition>,
        position: u64,
        offsets: Arc<OffsetStore>,
        available: Arc<AtomicBool>,
    ) -> Self {
        let end_rx = partition.watch_end();
        Self {
            group,
            partition,
            position,
            end_rx,
            offsets,
            available,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn partition(&self) -> u32 {
        self.partition.id()
    }

    /// Next offset this cursor will deliver
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Wait for and return the next event.
    pub async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            // Mark the current end as seen before reading so an append that
            // lands after the read still wakes `changed()`.
            self.end_rx.borrow_and_update();
            if let Some(delivery) = self.try_next()? {
                return Ok(delivery);
            }
            self.end_rx.changed().await.map_err(|_| BusError::Closed)?;
        }
    }

    /// Return the next event if one is available now.
    pub fn try_next(&mut self) -> Result<Option<Delivery>, BusError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus unreachable".into()));
        }
        loop {
            match self.partition.read(self.position)? {
                ReadOutcome::Event(event) => {
                    let delivery = Delivery {
                        partition: self.partition.id(),
                        offset: self.position,
                        event,
                    };
                    self.position += 1;
                    return Ok(Some(delivery));
                }
                ReadOutcome::BeforeStart(start) => {
                    warn!(
                        group = %self.group,
                        partition = self.partition.id(),
                        position = self.position,
                        log_start = start,
                        "position evicted by retention, skipping to log start"
                    );
                    self.position = start;
                }
                ReadOutcome::AtEnd => return Ok(None),
            }
        }
    }

    /// Move the cursor; later deliveries restart from `offset`.
    pub fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    /// Durably record `next_offset` as this group's progress.
    pub fn commit(&self, next_offset: u64) -> Result<(), BusError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus unreachable".into()));
        }
        self.offsets
            .commit(&self.group, self.partition.id(), next_offset)
    }

    pub fn committed(&self) -> Result<Option<u64>, BusError> {
        self.offsets.committed(&self.group, self.partition.id())
    }
}
