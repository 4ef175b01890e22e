//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Every committed question transaction and every answer append becomes
//! exactly one WAL entry, written and flushed before the in-memory state
//! changes. A transaction's shifts and its new question therefore survive or
//! vanish together.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of WalEntry]
//! [ENTRY 2: codec frame of WalEntry]
//! ...
//! ```
//!
//! A torn tail (crash mid-append) is cut off on open so that later appends
//! stay readable.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answer::AnswerRecord;
use crate::storage::state::WriteBatch;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number; never reused, even across
    /// truncation.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A committed question transaction.
    QuestionCommit(WriteBatch),
    /// An appended answer record.
    ResponseAppend(AnswerRecord),
    /// Everything up to `up_to_sequence` is in the snapshot.
    Checkpoint {
        /// Last sequence folded into the snapshot.
        up_to_sequence: u64,
    },
}

/// Entries recovered from an existing log.
#[derive(Debug, Default)]
pub struct WalRecovery {
    /// Intact entries in log order.
    pub entries: Vec<WalEntry>,
    /// Bytes dropped from a torn or corrupt tail.
    pub discarded_bytes: u64,
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
    /// Set when a failed append could not be rolled back; every later write
    /// fails until the log is reopened.
    broken: bool,
}

/// Append-only log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, "poisoned lock: wal")
}

impl WriteAheadLog {
    /// Open or create the log, returning it with every intact entry.
    ///
    /// `base_sequence` is the highest sequence already covered elsewhere (the
    /// snapshot); new entries are numbered above both it and the log's tail.
    pub fn open(
        path: &Path,
        sync_on_write: bool,
        base_sequence: u64,
    ) -> IoResult<(Self, WalRecovery)> {
        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let recovery = if existing_len >= codec::HEADER_LEN {
            let (recovery, valid_len) = Self::scan(path, existing_len)?;
            if valid_len < existing_len {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            recovery
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            WalRecovery::default()
        };

        let last = recovery.entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                inner: Mutex::new(WalWriter {
                    file: BufWriter::new(file),
                    sequence: last.max(base_sequence),
                    broken: false,
                }),
                sync_on_write,
            },
            recovery,
        ))
    }

    fn scan(path: &Path, file_len: u64) -> IoResult<(WalRecovery, u64)> {
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;

        let mut recovery = WalRecovery::default();
        let mut valid_len = codec::HEADER_LEN;
        while valid_len < file_len {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) => {
                    recovery.entries.push(entry);
                    valid_len = reader.stream_position()?;
                }
                Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) => {
                    tracing::warn!(
                        path = %path.display(),
                        offset = valid_len,
                        error = %e,
                        "discarding unreadable WAL tail"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        recovery.discarded_bytes = file_len - valid_len;
        Ok((recovery, valid_len))
    }

    /// Append an entry, returning its sequence number.
    ///
    /// On failure the file is cut back to its length before the call and any
    /// buffered bytes of the frame are discarded, so a failed entry can never
    /// surface on replay.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        if inner.broken {
            return Err(std::io::Error::new(
                ErrorKind::Other,
                "WAL is unusable after a failed rollback; reopen the database",
            ));
        }

        let sequence = inner.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let start = inner.file.get_ref().metadata()?.len();
        let written = Self::write_frame(&mut inner.file, &encoded, self.sync_on_write);
        if let Err(e) = written {
            if let Err(rollback) = self.rollback(&mut inner, start) {
                inner.broken = true;
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back WAL append"
                );
            } else {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    len = start,
                    "WAL append failed, rolled back"
                );
            }
            return Err(e);
        }

        inner.sequence = sequence;
        Ok(sequence)
    }

    fn write_frame(file: &mut BufWriter<File>, frame: &[u8], sync: bool) -> IoResult<()> {
        file.write_all(frame)?;
        file.flush()?;
        if sync {
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Discard unwritten bytes and cut the file back to `len`.
    fn rollback(&self, inner: &mut WalWriter, len: u64) -> IoResult<()> {
        let fresh = inner.file.get_ref().try_clone()?;
        let old = std::mem::replace(&mut inner.file, BufWriter::new(fresh));
        // into_parts hands back the buffer instead of flushing it on drop.
        let (old_file, _unwritten) = old.into_parts();
        drop(old_file);

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Highest sequence number assigned so far.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.sequence)
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop all entries, keeping the sequence counter.
    ///
    /// Only call after the entries are durable in a snapshot.
    pub fn truncate(&self) -> IoResult<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.file.flush()?;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        codec::write_header(&mut file)?;
        file.sync_all()?;
        drop(file);

        let file = OpenOptions::new().append(true).open(&self.path)?;
        inner.file = BufWriter::new(file);
        inner.broken = false;
        Ok(())
    }
}
