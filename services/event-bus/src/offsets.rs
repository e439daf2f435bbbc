//! Durable consumer-group offsets
//!
//! The committed offset of a (group, partition) is the next offset the group
//! has yet to process. With a data directory every commit rewrites
//! `offsets.json` atomically (tmp file, fsync, rename).

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const OFFSETS_FILE: &str = "offsets.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct OffsetTable {
    groups: BTreeMap<String, BTreeMap<u32, u64>>,
}

#[derive(Debug)]
pub struct OffsetStore {
    path: Option<PathBuf>,
    table: Mutex<OffsetTable>,
}

impl OffsetStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: Mutex::new(OffsetTable::default()),
        }
    }

    /// Load committed offsets from `dir`, starting empty if none exist.
    pub fn open(dir: &Path) -> Result<Self, BusError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(OFFSETS_FILE);
        let table = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data).map_err(|e| BusError::OffsetStore(e.to_string()))?
        } else {
            OffsetTable::default()
        };
        Ok(Self {
            path: Some(path),
            table: Mutex::new(table),
        })
    }

    pub fn committed(&self, group: &str, partition: u32) -> Result<Option<u64>, BusError> {
        let table = self.lock()?;
        Ok(table
            .groups
            .get(group)
            .and_then(|parts| parts.get(&partition))
            .copied())
    }

    /// Record `next_offset` for the group and persist the table.
    pub fn commit(&self, group: &str, partition: u32, next_offset: u64) -> Result<(), BusError> {
        let mut table = self.lock()?;
        table
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(partition, next_offset);

        if let Some(path) = &self.path {
            let data = serde_json::to_vec_pretty(&*table)
                .map_err(|e| BusError::OffsetStore(e.to_string()))?;
            write_atomic(path, &data)?;
        }
        debug!(group, partition, next_offset, "offset committed");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, OffsetTable>, BusError> {
        self.table
            .lock()
            .map_err(|_| BusError::OffsetStore("offset table lock poisoned".into()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BusError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_and_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let store = OffsetStore::open(tmp.path()).unwrap();
            assert_eq!(store.committed("engine", 0).unwrap(), None);
            store.commit("engine", 0, 12).unwrap();
            store.commit("engine", 3, 4).unwrap();
            store.commit("audit", 0, 1).unwrap();
        }
        let store = OffsetStore::open(tmp.path()).unwrap();
        assert_eq!(store.committed("engine", 0).unwrap(), Some(12));
        assert_eq!(store.committed("engine", 3).unwrap(), Some(4));
        assert_eq!(store.committed("audit", 0).unwrap(), Some(1));
        assert!(!tmp.path().join("offsets.json.tmp").exists());
    }

    #[test]
    fn test_in_memory_commit() {
        let store = OffsetStore::in_memory();
        store.commit("g", 1, 7).unwrap();
        assert_eq!(store.committed("g", 1).unwrap(), Some(7));
        assert_eq!(store.committed("g", 2).unwrap(), None);
    }
}
