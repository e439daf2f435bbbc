//! Journal Reader: sequential replay with corruption detection
//!
//! - CRC32C validation on every entry
//! - Corruption log with byte offsets
//! - Partial recovery that skips a damaged region and keeps going
//! - Seek by sequence for replay from a durable offset
//! - Gapless sequence validation
//! - Torn-tail repair before a writer reopens the journal

use crate::journal::{journal_files, JournalEntry, JournalError};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checksum mismatch at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch { offset: u64, sequence: u64 },
}

// ── Corruption Log ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    /// Byte offset across all files where corruption was detected
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    global_offset: u64,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`. A missing directory
    /// reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = journal_files(dir)?.into_iter().map(|(_, p)| p).collect();
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            global_offset: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Read the next entry, validating its checksum.
    ///
    /// Returns `None` once every file is exhausted. An unparseable tail in
    /// one file is logged and the reader moves on to the next file.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }

            let offset_before = self.global_offset;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    self.pos += consumed;
                    self.global_offset += consumed as u64;

                    if !entry.verify_checksum() {
                        self.corruption_log.push(CorruptionRecord {
                            byte_offset: offset_before,
                            kind: CorruptionKind::ChecksumMismatch,
                            detail: format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        });
                        return Err(ReaderError::ChecksumMismatch {
                            offset: offset_before,
                            sequence: entry.sequence,
                        });
                    }

                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(e) => {
                    let remaining = self.data.len() - self.pos;
                    self.corruption_log.push(CorruptionRecord {
                        byte_offset: offset_before,
                        kind: CorruptionKind::TruncatedEntry,
                        detail: format!("{remaining} trailing bytes unparseable: {e}"),
                    });
                    self.global_offset += remaining as u64;
                    self.pos = self.data.len();
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Position the reader at the first entry with `sequence >= target`.
    /// Returns the number of entries skipped.
    pub fn seek_to_sequence(&mut self, target: u64) -> Result<u64, ReaderError> {
        let mut skipped = 0u64;
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                break;
            }
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    if entry.sequence >= target {
                        break;
                    }
                    self.pos += consumed;
                    self.global_offset += consumed as u64;
                    self.last_sequence = Some(entry.sequence);
                    skipped += 1;
                }
                Err(_) => {
                    self.global_offset += (self.data.len() - self.pos) as u64;
                    self.pos = self.data.len();
                }
            }
        }
        Ok(skipped)
    }

    /// Read as many valid entries as possible, skipping corrupted regions.
    pub fn recover_entries(&mut self) -> (Vec<JournalEntry>, Vec<CorruptionRecord>) {
        let mut entries = Vec::new();
        loop {
            match self.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(ReaderError::ChecksumMismatch { offset, sequence }) => {
                    warn!(offset, sequence, "skipping corrupted journal entry");
                }
                Err(e) => {
                    warn!(error = %e, "journal recovery stopped");
                    break;
                }
            }
        }
        (entries, self.corruption_log.clone())
    }

    pub fn current_offset(&self) -> u64 {
        self.global_offset
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data = match self.files.get(self.current_file_idx) {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        self.pos = 0;
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        self.current_file_idx += 1;
        if self.current_file_idx < self.files.len() {
            self.load_current_file()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Truncate the newest journal file after its last valid entry.
///
/// A crash mid-append leaves a partial frame at the end of the active file;
/// appending behind it would hide every later entry from readers. Returns
/// the number of bytes cut.
pub fn repair_tail(dir: &Path) -> Result<u64, ReaderError> {
    let Some((_, path)) = journal_files(dir)?.pop() else {
        return Ok(0);
    };
    let data = fs::read(&path)?;
    let mut valid = 0usize;
    while valid < data.len() {
        match JournalEntry::from_bytes(&data[valid..]) {
            Ok((entry, consumed)) if entry.verify_checksum() => valid += consumed,
            _ => break,
        }
    }
    let cut = (data.len() - valid) as u64;
    if cut > 0 {
        warn!(path = %path.display(), bytes = cut, "truncating torn journal tail");
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(valid as u64)?;
        file.sync_all()?;
    }
    Ok(cut)
}

// ── Tests ───────────────────────────────────────────────────────────
