//! Persistent store implementations.
//!
//! Each store wraps:
//! - The same in-memory state the in-memory backend uses, for reads
//! - WAL integration for durable writes (log first, then apply)
//! - Snapshot + WAL replay on open

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::answer::{AnswerRecord, ResponseId};
use crate::question::{Question, QuestionId};
use crate::storage::state::{lock_err, run_optimistic, QuestionState};
use crate::storage::traits::{
    QuestionStore, ResponseStore, StorageError, TransactionBody, TransactionOptions,
    TransactionReport,
};

use super::file_lock::DirLock;
use super::snapshot::{self, SnapshotData};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "survey.wal";

fn wal_err(e: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("WAL write failed: {e}"))
}

/// Aggregate type owning both persistent stores and the directory lock.
///
/// This is the primary entry point for persistent storage. The stores are
/// handed out as `Arc`s so they can be shared with an engine while this value
/// keeps the lock alive.
pub struct PersistentStores {
    /// The database directory.
    pub dir: PathBuf,
    _lock: DirLock,
    wal: Arc<WriteAheadLog>,
    config: PersistentConfig,
    /// Question collection.
    pub questions: Arc<PersistentQuestionStore>,
    /// Answer collection.
    pub responses: Arc<PersistentResponseStore>,
}

impl PersistentStores {
    /// Open or create a persistent database.
    ///
    /// # Errors
    /// - directory cannot be created or is locked by another process
    /// - snapshot or WAL is unreadable beyond a torn tail
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::BackendError(format!("failed to create data directory: {e}"))
        })?;

        let lock = DirLock::acquire(dir)
            .map_err(|e| StorageError::BackendError(format!("failed to acquire lock: {e}")))?;

        let snapshot = snapshot::load(dir)
            .map_err(|e| StorageError::BackendError(format!("failed to load snapshot: {e}")))?
            .unwrap_or_default();
        let base_sequence = snapshot.sequence;

        let (wal, recovery) =
            WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write, base_sequence)
                .map_err(|e| StorageError::BackendError(format!("failed to open WAL: {e}")))?;
        let wal = Arc::new(wal);

        let mut questions = QuestionState::from_questions(snapshot.questions)?;
        let mut responses: HashMap<ResponseId, AnswerRecord> = snapshot
            .responses
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut replayed = 0usize;
        for entry in recovery.entries {
            if entry.sequence <= base_sequence {
                continue;
            }
            match entry.kind {
                WalEntryKind::QuestionCommit(batch) => {
                    questions.apply(batch).map_err(|e| {
                        StorageError::BackendError(format!(
                            "failed to replay WAL entry {}: {e}",
                            entry.sequence
                        ))
                    })?;
                }
                WalEntryKind::ResponseAppend(record) => {
                    responses.entry(record.id).or_insert(record);
                }
                WalEntryKind::Checkpoint { .. } => continue,
            }
            replayed += 1;
        }
        if replayed > 0 {
            tracing::debug!(
                dir = %dir.display(),
                replayed,
                discarded_bytes = recovery.discarded_bytes,
                "replayed WAL entries"
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal: Arc::clone(&wal),
            config,
            questions: Arc::new(PersistentQuestionStore {
                wal: Arc::clone(&wal),
                state: RwLock::new(questions),
            }),
            responses: Arc::new(PersistentResponseStore {
                wal,
                records: RwLock::new(responses),
            }),
        })
    }

    /// Fold the WAL into a fresh snapshot and truncate it.
    ///
    /// Writers are blocked for the duration. If this fails partway through,
    /// the WAL still holds every entry and is replayed on next open; entries
    /// already in a renamed snapshot are skipped by sequence number.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let questions = self
            .questions
            .state
            .write()
            .map_err(|_| lock_err("compact.questions"))?;
        let responses = self
            .responses
            .records
            .write()
            .map_err(|_| lock_err("compact.responses"))?;

        let wal_size_before = self.wal_size();
        let sequence = self
            .wal
            .current_sequence()
            .map_err(|e| StorageError::BackendError(format!("failed to read WAL sequence: {e}")))?;

        let data = SnapshotData {
            sequence,
            created_at: Some(Utc::now()),
            questions: questions.ordered(),
            responses: responses.values().cloned().collect(),
        };
        let snapshot_path = snapshot::write(&self.dir, &data)
            .map_err(|e| StorageError::BackendError(format!("failed to write snapshot: {e}")))?;

        self.wal
            .append(WalEntryKind::Checkpoint {
                up_to_sequence: sequence,
            })
            .map_err(|e| wal_err(&e))?;
        self.wal
            .truncate()
            .map_err(|e| StorageError::BackendError(format!("failed to truncate WAL: {e}")))?;

        let result = CompactionResult {
            documents: data.document_count(),
            up_to_sequence: sequence,
            snapshot_path,
            wal_size_before,
            wal_size_after: self.wal_size(),
        };
        tracing::info!(
            documents = result.documents,
            up_to_sequence = result.up_to_sequence,
            wal_size_before = result.wal_size_before,
            "compacted WAL into snapshot"
        );
        Ok(result)
    }

    /// Compact only when the WAL has outgrown `max_wal_size`.
    pub fn maybe_compact(&self) -> Result<Option<CompactionResult>, StorageError> {
        if self.wal_size() < self.config.max_wal_size {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    /// Current WAL size in bytes.
    #[must_use]
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Documents written into the snapshot.
    pub documents: usize,
    /// Last WAL sequence covered by the snapshot.
    pub up_to_sequence: u64,
    /// Path of the snapshot file.
    pub snapshot_path: PathBuf,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

// --- Question Store ---

/// WAL-backed question collection.
pub struct PersistentQuestionStore {
    wal: Arc<WriteAheadLog>,
    state: RwLock<QuestionState>,
}

impl QuestionStore for PersistentQuestionStore {
    fn list_ordered(&self) -> Result<Vec<Question>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("question.list_ordered"))?;
        Ok(state.ordered())
    }

    fn get(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("question.get"))?;
        Ok(state.get(id).cloned())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("question.count"))?;
        Ok(state.len())
    }

    fn run_transaction(
        &self,
        options: &TransactionOptions,
        body: &mut TransactionBody<'_>,
    ) -> Result<TransactionReport, StorageError> {
        run_optimistic(&self.state, options, body, |batch| {
            self.wal
                .append(WalEntryKind::QuestionCommit(batch.clone()))
                .map(|_| ())
                .map_err(|e| wal_err(&e))
        })
    }
}

// --- Response Store ---

/// WAL-backed answer collection.
pub struct PersistentResponseStore {
    wal: Arc<WriteAheadLog>,
    records: RwLock<HashMap<ResponseId, AnswerRecord>>,
}

impl ResponseStore for PersistentResponseStore {
    fn append(&self, record: AnswerRecord) -> Result<ResponseId, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("response.append"))?;
        if records.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }

        self.wal
            .append(WalEntryKind::ResponseAppend(record.clone()))
            .map_err(|e| wal_err(&e))?;

        let id = record.id;
        records.insert(id, record);
        Ok(id)
    }

    fn get(&self, id: ResponseId) -> Result<Option<AnswerRecord>, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("response.get"))?;
        Ok(records.get(&id).cloned())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("response.count"))?;
        Ok(records.len())
    }
}
