//! Abstract storage traits for the questionnaire store.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - Persistent backends for production
//! - Test doubles that record or fail individual calls

use std::time::Duration;

use thiserror::Error;

use crate::answer::{AnswerRecord, ResponseId};
use crate::question::{Question, QuestionId, ValidatedQuestion};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Question not found.
    #[error("Question not found: {0}")]
    QuestionNotFound(QuestionId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A transaction read observed a collection that changed after the
    /// attempt's first read. Consumed by the transaction runner, which retries.
    #[error("Stale read inside transaction")]
    StaleRead,

    /// Every transaction attempt lost to a concurrent writer.
    #[error("Transaction conflict: gave up after {attempts} attempts")]
    TransactionConflict {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The transaction body misused its handle.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StorageError {
    /// Returns true when the runner should discard the attempt and retry.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleRead)
    }
}

/// Retry policy for [`QuestionStore::run_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Sleep before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl TransactionOptions {
    /// Policy with the given attempt budget and default backoff.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff to sleep after the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Outcome of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReport {
    /// Attempt number that committed (1 = no retry).
    pub attempts: u32,
    /// Number of document writes committed.
    pub writes: usize,
}

/// Handle passed to a transaction body.
///
/// Reads are tracked for conflict detection and must all happen before the
/// first write. Writes are buffered and only become visible on commit.
pub trait QuestionTransaction {
    /// Questions with `order >= min_order`, ascending by order.
    fn find_from_order(&mut self, min_order: u64) -> Result<Vec<Question>, StorageError>;

    /// The question created with the given idempotency key, if any.
    fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<Question>, StorageError>;

    /// Stage a new position for an existing question.
    fn set_order(&mut self, id: QuestionId, order: u64) -> Result<(), StorageError>;

    /// Stage a new question. The store assigns and returns its id.
    fn create(
        &mut self,
        question: ValidatedQuestion,
        order: u64,
        idempotency_key: Option<String>,
    ) -> Result<QuestionId, StorageError>;
}

/// Transaction body. Runs once per attempt, so it must be safe to re-run.
pub type TransactionBody<'a> =
    dyn FnMut(&mut dyn QuestionTransaction) -> Result<(), StorageError> + 'a;

/// Storage trait for the ordered question collection.
///
/// # Safety Considerations
/// - A committed transaction applies all of its writes or none of them
/// - Implementations must detect conflicting concurrent commits
pub trait QuestionStore: Send + Sync {
    /// All questions ascending by order.
    fn list_ordered(&self) -> Result<Vec<Question>, StorageError>;

    /// Get a question by ID.
    fn get(&self, id: QuestionId) -> Result<Option<Question>, StorageError>;

    /// Number of stored questions.
    fn count(&self) -> Result<usize, StorageError>;

    /// Run `body` under an optimistic transaction, retrying on conflict.
    ///
    /// # Errors
    /// - `TransactionConflict` when `options.max_attempts` is exhausted
    /// - any non-stale error returned by `body` or raised at commit
    fn run_transaction(
        &self,
        options: &TransactionOptions,
        body: &mut TransactionBody<'_>,
    ) -> Result<TransactionReport, StorageError>;
}

/// Storage trait for submitted answers. Append-only.
pub trait ResponseStore: Send + Sync {
    /// Append a record. Returns error if its ID already exists.
    fn append(&self, record: AnswerRecord) -> Result<ResponseId, StorageError>;

    /// Get a record by ID.
    fn get(&self, id: ResponseId) -> Result<Option<AnswerRecord>, StorageError>;

    /// Number of stored records.
    fn count(&self) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_question_store_object_safe(_: &dyn QuestionStore) {}
    fn _assert_response_store_object_safe(_: &dyn ResponseStore) {}
    fn _assert_transaction_object_safe(_: &mut dyn QuestionTransaction) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::QuestionNotFound(QuestionId::new());
        assert!(err.to_string().contains("Question not found"));

        let err = StorageError::TransactionConflict { attempts: 4 };
        assert!(err.to_string().contains("4 attempts"));
        assert!(!err.is_stale());
        assert!(StorageError::StaleRead.is_stale());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let opts = TransactionOptions {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(10),
        };
        assert_eq!(opts.backoff_after(1), Duration::from_millis(2));
        assert_eq!(opts.backoff_after(2), Duration::from_millis(4));
        assert_eq!(opts.backoff_after(3), Duration::from_millis(8));
        assert_eq!(opts.backoff_after(4), Duration::from_millis(10));
        assert_eq!(opts.backoff_after(40), Duration::from_millis(10));
    }
}
