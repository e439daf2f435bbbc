//! Snapshots: point-in-time state images with integrity and compression
//!
//! Generic over the state type. The feature store snapshots its version
//! histories; each engine lane snapshots its aggregate arena as a
//! checkpoint.
//!
//! - bincode serialization; state should use sorted maps so equal states
//!   hash equally
//! - SHA-256 integrity hash over the serialized state
//! - Optional zstd compression
//! - Atomic write (tmp file, fsync, rename)
//! - Interval policy and keep-last-N cleanup

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

/// SHA-256 hex digest of the bincode encoding of `state`
pub fn state_hash<S: Serialize>(state: &S) -> Result<String, SnapshotError> {
    let bytes =
        bincode::serialize(state).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    /// Format version
    pub version: u32,
    /// Position the state covers: the next journal sequence or bus offset
    /// to apply after loading
    pub sequence: u64,
    /// Unix nanoseconds when the snapshot was taken
    pub timestamp: i64,
    pub state: S,
    /// SHA-256 of the serialized state
    pub checksum: String,
}

impl<S: Serialize> Snapshot<S> {
    pub fn new(sequence: u64, timestamp: i64, state: S) -> Result<Self, SnapshotError> {
        let checksum = state_hash(&state)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            timestamp,
            state,
            checksum,
        })
    }

    pub fn verify_integrity(&self) -> bool {
        matches!(state_hash(&self.state), Ok(hash) if hash == self.checksum)
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize, optionally compress, and atomically write a snapshot.
    pub fn write<S: Serialize>(&self, snapshot: &Snapshot<S>) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data = bincode::serialize(snapshot)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load one snapshot file, verifying version and integrity.
    pub fn load<S>(&self, path: &Path) -> Result<Snapshot<S>, SnapshotError>
    where
        S: Serialize + DeserializeOwned,
    {
        let data = fs::read(path)?;
        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);
        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: Snapshot<S> = bincode::deserialize(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }

        let actual = state_hash(&snapshot.state)?;
        if actual != snapshot.checksum {
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual,
            });
        }

        Ok(snapshot)
    }

    /// Load the snapshot with the highest sequence.
    pub fn load_latest<S>(&self) -> Result<Snapshot<S>, SnapshotError>
    where
        S: Serialize + DeserializeOwned,
    {
        let path = self.find_latest()?;
        self.load(&path)
    }

    /// Load the newest snapshot that passes verification, skipping
    /// damaged ones. `Ok(None)` when none is usable.
    pub fn load_latest_valid<S>(&self) -> Result<Option<Snapshot<S>>, SnapshotError>
    where
        S: Serialize + DeserializeOwned,
    {
        for (seq, path) in self.list_snapshots()?.into_iter().rev() {
            match self.load(&path) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    tracing::warn!(sequence = seq, error = %e, "skipping unusable snapshot");
                }
            }
        }
        Ok(None)
    }

    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .pop()
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// All snapshots as (sequence, path), ascending by sequence.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_sequence(&name) {
                results.push((seq, entry.path()));
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        let stem = filename.strip_prefix("snapshot-")?;
        let digits = stem
            .strip_suffix(".snap.zst")
            .or_else(|| stem.strip_suffix(".snap"))?;
        digits.parse::<u64>().ok()
    }
}

// ── Snapshot Cleanup Policy ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    /// Keep only the newest `max_snapshots` files in `dir`.
    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;
        let excess = snapshots.len().saturating_sub(self.max_snapshots);

        let mut removed = Vec::with_capacity(excess);
        for (_, path) in snapshots.into_iter().take(excess) {
            fs::remove_file(&path)?;
            removed.push(path);
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
