//! Persistent storage backend.
//!
//! This module provides durable, crash-safe storage with:
//! - Write-Ahead Logging (WAL): one entry per committed transaction
//! - File locking for single-process access to a data directory
//! - CRC32 checksums for corruption detection
//! - Snapshots that bound WAL replay time
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PersistentStores                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────┐      ┌─────────────────────┐        │
//! │  │ PersistentQuestion- │      │ PersistentResponse- │        │
//! │  │ Store (txn commits) │      │ Store (appends)     │        │
//! │  └──────────┬──────────┘      └──────────┬──────────┘        │
//! │             └──────────────┬─────────────┘                   │
//! │                            ↓                                 │
//! │   ┌─────────────────┐   compact   ┌──────────────────┐       │
//! │   │ WriteAheadLog   │ ──────────→ │ snapshot.dat     │       │
//! │   └─────────────────┘             └──────────────────┘       │
//! │                  ┌─────────────────────┐                     │
//! │                  │   DirLock (flock)   │                     │
//! │                  └─────────────────────┘                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod stores;
mod wal;

pub use file_lock::DirLock;
pub use snapshot::SnapshotData;
pub use stores::{
    CompactionResult, PersistentQuestionStore, PersistentResponseStore, PersistentStores,
};
pub use wal::{WalEntry, WalEntryKind, WalRecovery, WriteAheadLog};

use std::path::Path;

use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// WAL size that makes [`PersistentStores::maybe_compact`] compact (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 16 * 1024 * 1024, // 16 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // avoids compacting on every write

    /// Reject degenerate settings.
    ///
    /// # Errors
    /// `BackendError` when `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StorageError::BackendError(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent database at the given path.
///
/// # Arguments
/// * `path` - Directory to store the database files
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If configuration is invalid or recovery fails
///
/// # Example
/// ```rust,ignore
/// use questionnaire::storage::open_database;
///
/// let stores = open_database("./survey-data", None)?;
/// let engine = SurveyEngine::new(stores.questions.clone(), stores.responses.clone());
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStores, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentStores::open(path.as_ref(), cfg)
}
