// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only write-ahead log of store operations.
//!
//! One JSON entry per line: `{"seq": N, "op": {...}}`. Sequence numbers are
//! monotonic across truncation, so replay after snapshot recovery only
//! applies entries with `seq > processed_seq`.

use crate::op::StoreOp;
use crate::store::StorageError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub op: StoreOp,
}

/// Append-only log with a replay cursor.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: BufReader<File>,
    write_seq: u64,
    processed_seq: u64,
}

impl Wal {
    /// Open (or create) the WAL at `path`.
    ///
    /// `processed_seq` is the sequence number already covered by the
    /// snapshot being recovered from; replay starts after it. The write
    /// cursor resumes at the highest seq found in the file, or at
    /// `processed_seq` when the file is empty (post-truncation reopen).
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).read(true).open(path)?;

        // Scan for the last valid seq; a corrupt tail (crash mid-write) ends
        // the scan.
        let mut max_seq = 0u64;
        let scan = BufReader::new(File::open(path)?);
        for line in scan.lines() {
            let line = line?;
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => max_seq = entry.seq,
                Err(e) => {
                    warn!(path = %path.display(), %e, "wal: corrupt tail entry, stopping scan");
                    break;
                }
            }
        }

        let reader = BufReader::new(File::open(path)?);
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            reader,
            write_seq: max_seq.max(processed_seq),
            processed_seq,
        })
    }

    /// Append an operation. Returns its sequence number. Call [`flush`]
    /// before applying the op to in-memory state.
    ///
    /// [`flush`]: Wal::flush
    pub fn append(&mut self, op: &StoreOp) -> Result<u64, StorageError> {
        let seq = self.write_seq + 1;
        let entry = WalEntry { seq, op: op.clone() };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.write_seq = seq;
        Ok(seq)
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Next entry past the replay cursor, or `None` at end of log.
    /// A corrupt entry ends replay early with a warning.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, StorageError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let entry: WalEntry = match serde_json::from_str(line.trim_end()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %self.path.display(), %e, "wal: corrupt entry, ending replay");
                    return Ok(None);
                }
            };
            if entry.seq > self.processed_seq {
                return Ok(Some(entry));
            }
        }
    }

    /// Advance the replay cursor.
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = self.processed_seq.max(seq);
    }

    /// Drop all entries after a snapshot covered them. Sequence numbering
    /// continues from the current write cursor.
    pub fn truncate(&mut self) -> Result<(), StorageError> {
        self.flush()?;
        self.writer.get_mut().set_len(0)?;
        self.writer.get_mut().seek(SeekFrom::Start(0))?;
        self.reader = BufReader::new(File::open(&self.path)?);
        self.processed_seq = self.write_seq;
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
