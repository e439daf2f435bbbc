//! Journal Writer: append-only, checksummed record log
//!
//! Backs every durable stream in the pipeline: bus partitions append one
//! entry per published event, the feature store appends one entry per
//! accepted commit. Sequences are gapless and assigned by the caller.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [kind_len:  u16][kind: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum:  u32]  // CRC32C over sequence+timestamp+kind+payload
//! ```

use crc32c::crc32c;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on a single entry body; anything larger is treated as corruption
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// 8 (seq) + 8 (ts) + 2 (kind_len) + 4 (payload_len) + 4 (crc)
const MIN_BODY_LEN: usize = 26;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Gapless sequence within one journal directory
    pub sequence: u64,
    /// Unix nanoseconds supplied by the writer
    pub timestamp: i64,
    /// Record kind tag, e.g. "event" or "commit"
    pub kind: String,
    /// Bincode-encoded record
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    /// Create a new entry, computing the CRC32C checksum.
    pub fn new(sequence: u64, timestamp: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    /// Encode `record` with bincode and wrap it in an entry.
    pub fn encode<T: Serialize>(
        sequence: u64,
        timestamp: i64,
        kind: impl Into<String>,
        record: &T,
    ) -> Result<Self, JournalError> {
        let payload =
            bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(Self::new(sequence, timestamp, kind, payload))
    }

    /// Decode the bincode payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, JournalError> {
        bincode::deserialize(&self.payload).map_err(|e| JournalError::Serialization(e.to_string()))
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    /// Serialize to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let body_len = MIN_BODY_LEN + kind.len() + self.payload.len();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(kind.len() as u16).to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)`. Truncated or implausible input is
    /// reported as an error, never a panic.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let mut cursor = Cursor::new(data);
        let body_len = cursor.u32()? as usize;

        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "implausible body length {body_len}"
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "body too small: {body_len} bytes, minimum is {MIN_BODY_LEN}"
            )));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Serialization(format!(
                "incomplete entry: need {total} bytes, have {}",
                data.len()
            )));
        }

        let mut body = Cursor::new(&data[4..total]);
        let sequence = body.u64()?;
        let timestamp = body.u64()? as i64;
        let kind_len = body.u16()? as usize;
        let kind = String::from_utf8(body.take(kind_len)?.to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        let payload_len = body.u32()? as usize;
        let payload = body.take(payload_len)?.to_vec();
        let checksum = body.u32()?;

        Ok((
            Self {
                sequence,
                timestamp,
                kind,
                payload,
                checksum,
            },
            total,
        ))
    }
}

/// Bounds-checked little-endian reader over a byte slice
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], JournalError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(JournalError::Serialization(format!(
                "field of {n} bytes exceeds remaining {} bytes",
                self.data.len() - self.pos
            ))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JournalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, JournalError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, JournalError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, JournalError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// When buffered data is handed to the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// When `fsync` is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Rotate to a new file past this size (default 64 MiB)
    pub max_file_size: u64,
    /// Refuse appends past this total size (0 = unlimited)
    pub max_total_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }

    /// Flush every write but leave fsync to rotation and explicit `sync`.
    /// Suited to logs that are also recoverable from upstream.
    pub fn relaxed(dir: impl Into<PathBuf>) -> Self {
        Self {
            fsync_policy: FsyncPolicy::OnRotation,
            ..Self::new(dir)
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with checksums, rotation and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
}

impl JournalWriter {
    /// Open a writer, creating the directory if needed. The next sequence
    /// starts at 0 until the caller sets it from recovery.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = latest_file_index(&config.dir)?.unwrap_or(0);
        let current_file = journal_path(&config.dir, file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();
        let total_size = directory_size(&config.dir)?;

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
            file_index,
            total_size,
        })
    }

    /// Open a writer that continues at `next_sequence`.
    pub fn open_at(config: JournalConfig, next_sequence: u64) -> Result<Self, JournalError> {
        let mut writer = Self::open(config)?;
        writer.set_next_sequence(next_sequence);
        Ok(writer)
    }

    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Append an entry. The sequence must equal `next_sequence()`.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;

        let written = bytes.len() as u64;
        self.current_file_size += written;
        self.total_size += written;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;
        Ok(())
    }

    /// Encode `record` at the next sequence and append it.
    pub fn append_record<T: Serialize>(
        &mut self,
        timestamp: i64,
        kind: &str,
        record: &T,
    ) -> Result<u64, JournalError> {
        let sequence = self.next_sequence;
        let entry = JournalEntry::encode(sequence, timestamp, kind, record)?;
        self.append(&entry)?;
        Ok(sequence)
    }

    /// Force flush + fsync.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Delete every rotated file whose entries all precede `sequence`.
    ///
    /// Used after a snapshot covers the prefix. The active file is never
    /// removed. Returns the deleted paths.
    pub fn remove_files_before(&mut self, sequence: u64) -> Result<Vec<PathBuf>, JournalError> {
        let files = journal_files(&self.config.dir)?;
        let mut removed = Vec::new();
        // A file is fully covered when the next file starts at or below `sequence`.
        for pair in files.windows(2) {
            let (index, path) = &pair[0];
            if *index >= self.file_index {
                break;
            }
            let next_first = first_sequence(&pair[1].1)?;
            if matches!(next_first, Some(first) if first <= sequence) {
                let len = fs::metadata(path)?.len();
                fs::remove_file(path)?;
                self.total_size = self.total_size.saturating_sub(len);
                removed.push(path.clone());
            } else {
                break;
            }
        }
        Ok(removed)
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = journal_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;

        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ── File Layout ─────────────────────────────────────────────────────

pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("journal-{:06}.bin", index))
}

fn parse_index(name: &str) -> Option<u64> {
    name.strip_prefix("journal-")?
        .strip_suffix(".bin")?
        .parse::<u64>()
        .ok()
}

/// All journal files in `dir`, sorted by index
pub(crate) fn journal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, io::Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            parse_index(&name).map(|idx| (idx, e.path()))
        })
        .collect();
    files.sort_by_key(|(idx, _)| *idx);
    Ok(files)
}

fn latest_file_index(dir: &Path) -> Result<Option<u64>, io::Error> {
    Ok(journal_files(dir)?.last().map(|(idx, _)| *idx))
}

fn directory_size(dir: &Path) -> Result<u64, io::Error> {
    let mut total = 0u64;
    for (_, path) in journal_files(dir)? {
        total += fs::metadata(path)?.len();
    }
    Ok(total)
}

fn first_sequence(path: &Path) -> Result<Option<u64>, JournalError> {
    let data = fs::read(path)?;
    if data.is_empty() {
        return Ok(None);
    }
    Ok(JournalEntry::from_bytes(&data).ok().map(|(e, _)| e.sequence))
}

// ── Tests ───────────────────────────────────────────────────────────
