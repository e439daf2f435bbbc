//! One ordered, append-only partition log
//!
//! Offsets are dense and start at 0. Retention drops events from the front
//! and advances the log start; the end offset is broadcast through a watch
//! channel so subscribers can wait without polling.

use crate::error::BusError;
use persistence::{
    repair_tail, JournalConfig, JournalEntry, JournalReader, JournalWriter,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::event::Event;

const EVENT_KIND: &str = "event";

/// Result of reading one offset
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Event(Event),
    /// Offset was evicted by retention; the log now starts here
    BeforeStart(u64),
    /// Nothing at this offset yet
    AtEnd,
}

#[derive(Debug, Default)]
struct PartitionLog {
    /// Offset of `events[0]`
    start: u64,
    events: VecDeque<Event>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.start + self.events.len() as u64
    }
}

pub struct Partition {
    id: u32,
    retention: usize,
    log: RwLock<PartitionLog>,
    journal: Option<Mutex<JournalWriter>>,
    end_tx: watch::Sender<u64>,
    evicted_since_cleanup: Mutex<usize>,
}

impl Partition {
    pub fn in_memory(id: u32, retention: usize) -> Self {
        let (end_tx, _) = watch::channel(0);
        Self {
            id,
            retention: retention.max(1),
            log: RwLock::new(PartitionLog::default()),
            journal: None,
            end_tx,
            evicted_since_cleanup: Mutex::new(0),
        }
    }

    /// Open a journal-backed partition, replaying whatever the journal holds.
    pub fn open(id: u32, retention: usize, dir: &Path, fsync_every: bool) -> Result<Self, BusError> {
        repair_tail(dir)?;

        let mut log = PartitionLog::default();
        let mut reader = JournalReader::open(dir)?;
        let (entries, corruption) = reader.recover_entries();
        if !corruption.is_empty() {
            warn!(partition = id, records = corruption.len(), "partition journal had corruption");
        }
        for entry in entries {
            let event: Event = entry.decode()?;
            if log.events.is_empty() {
                log.start = entry.sequence;
            } else if entry.sequence != log.end() {
                warn!(
                    partition = id,
                    expected = log.end(),
                    found = entry.sequence,
                    "gap in partition journal, stopping replay"
                );
                break;
            }
            log.events.push_back(event);
        }

        let retention = retention.max(1);
        while log.events.len() > retention {
            log.events.pop_front();
            log.start += 1;
        }

        let config = if fsync_every {
            JournalConfig::new(dir)
        } else {
            JournalConfig::relaxed(dir)
        };
        let writer = JournalWriter::open_at(config, log.end())?;

        info!(
            partition = id,
            start = log.start,
            end = log.end(),
            "partition recovered from journal"
        );

        let (end_tx, _) = watch::channel(log.end());
        Ok(Self {
            id,
            retention,
            log: RwLock::new(log),
            journal: Some(Mutex::new(writer)),
            end_tx,
            evicted_since_cleanup: Mutex::new(0),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Append an event, returning its offset.
    ///
    /// With a journal the entry is written before the event becomes
    /// readable, so a delivered event is always durable.
    pub fn append(&self, event: Event, timestamp: i64) -> Result<u64, BusError> {
        let mut log = self.log.write().map_err(|_| poisoned(self.id))?;
        let offset = log.end();

        if let Some(journal) = &self.journal {
            let mut writer = journal.lock().map_err(|_| poisoned(self.id))?;
            let entry = JournalEntry::encode(offset, timestamp, EVENT_KIND, &event)?;
            writer.append(&entry)?;
        }

        log.events.push_back(event);
        let mut evicted = 0usize;
        while log.events.len() > self.retention {
            log.events.pop_front();
            log.start += 1;
            evicted += 1;
        }
        let (start, end) = (log.start, log.end());
        drop(log);

        if evicted > 0 {
            debug!(partition = self.id, start, "retention advanced log start");
            self.maybe_cleanup_journal(start, evicted)?;
        }
        self.end_tx.send_replace(end);
        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> Result<ReadOutcome, BusError> {
        let log = self.log.read().map_err(|_| poisoned(self.id))?;
        if offset < log.start {
            return Ok(ReadOutcome::BeforeStart(log.start));
        }
        let idx = (offset - log.start) as usize;
        Ok(match log.events.get(idx) {
            Some(event) => ReadOutcome::Event(event.clone()),
            None => ReadOutcome::AtEnd,
        })
    }

    /// (log start, end) offsets
    pub fn bounds(&self) -> Result<(u64, u64), BusError> {
        let log = self.log.read().map_err(|_| poisoned(self.id))?;
        Ok((log.start, log.end()))
    }

    pub fn watch_end(&self) -> watch::Receiver<u64> {
        self.end_tx.subscribe()
    }

    pub fn sync(&self) -> Result<(), BusError> {
        if let Some(journal) = &self.journal {
            journal.lock().map_err(|_| poisoned(self.id))?.sync()?;
        }
        Ok(())
    }

    fn maybe_cleanup_journal(&self, start: u64, evicted: usize) -> Result<(), BusError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let mut since = self
            .evicted_since_cleanup
            .lock()
            .map_err(|_| poisoned(self.id))?;
        *since += evicted;
        if *since < self.retention {
            return Ok(());
        }
        *since = 0;
        let removed = journal
            .lock()
            .map_err(|_| poisoned(self.id))?
            .remove_files_before(start)?;
        if !removed.is_empty() {
            debug!(partition = self.id, files = removed.len(), "removed expired journal files");
        }
        Ok(())
    }
}

fn poisoned(partition: u32) -> BusError {
    BusError::Unavailable(format!("partition {partition} lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::event::{EventType, InteractionPayload};
    use types::ids::EntityId;

    fn event(n: u64) -> Event {
        Event::new(
            EntityId::new("u1"),
            EventType::View,
            InteractionPayload::item(n),
            n as i64,
            n as i64,
        )
    }

    #[test]
    fn test_offsets_are_dense() {
        let partition = Partition::in_memory(0, 10);
        for n in 0..5 {
            assert_eq!(partition.append(event(n), 0).unwrap(), n);
        }
        assert_eq!(partition.bounds().unwrap(), (0, 5));
        assert!(matches!(partition.read(2).unwrap(), ReadOutcome::Event(e) if e.payload.item_id == Some(2)));
        assert_eq!(partition.read(5).unwrap(), ReadOutcome::AtEnd);
    }

    #[test]
    fn test_retention_advances_start() {
        let partition = Partition::in_memory(0, 3);
        for n in 0..5 {
            partition.append(event(n), 0).unwrap();
        }
        assert_eq!(partition.bounds().unwrap(), (2, 5));
        assert_eq!(partition.read(0).unwrap(), ReadOutcome::BeforeStart(2));
    }

    #[test]
    fn test_journal_replay_preserves_offsets() {
        let tmp = TempDir::new().unwrap();
        let written: Vec<Event> = (0..4).map(event).collect();
        {
            let partition = Partition::open(0, 100, tmp.path(), false).unwrap();
            for e in &written {
                partition.append(e.clone(), 0).unwrap();
            }
            partition.sync().unwrap();
        }

        let reopened = Partition::open(0, 100, tmp.path(), false).unwrap();
        assert_eq!(reopened.bounds().unwrap(), (0, 4));
        assert_eq!(reopened.read(3).unwrap(), ReadOutcome::Event(written[3].clone()));
        assert_eq!(reopened.append(event(9), 0).unwrap(), 4);
    }

    #[test]
    fn test_reopen_applies_retention() {
        let tmp = TempDir::new().unwrap();
        {
            let partition = Partition::open(0, 100, tmp.path(), false).unwrap();
            for n in 0..10 {
                partition.append(event(n), 0).unwrap();
            }
        }
        let reopened = Partition::open(0, 4, tmp.path(), false).unwrap();
        assert_eq!(reopened.bounds().unwrap(), (6, 10));
    }

    #[test]
    fn test_watch_sees_new_end() {
        let partition = Partition::in_memory(0, 10);
        let mut rx = partition.watch_end();
        assert_eq!(*rx.borrow_and_update(), 0);
        partition.append(event(0), 0).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), 1);
    }
}
