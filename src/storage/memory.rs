//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::answer::{AnswerRecord, ResponseId};
use crate::question::{Question, QuestionId};
use crate::storage::state::{lock_err, run_optimistic, QuestionState};
use crate::storage::traits::{
    QuestionStore, ResponseStore, StorageError, TransactionBody, TransactionOptions,
    TransactionReport,
};

/// Thread-safe in-memory question store.
#[derive(Debug, Default)]
pub struct InMemoryQuestionStore {
    state: RwLock<QuestionState>,
}

impl InMemoryQuestionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with existing documents.
    ///
    /// # Errors
    /// `DuplicateKey` if two documents share an id or idempotency key.
    pub fn with_questions(
        questions: impl IntoIterator<Item = Question>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            state: RwLock::new(QuestionState::from_questions(questions)?),
        })
    }
}

impl QuestionStore for InMemoryQuestionStore {
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
        run_optimistic(&self.state, options, body, |_| Ok(()))
    }
}

/// Thread-safe in-memory answer store.
#[derive(Debug, Default)]
pub struct InMemoryResponseStore {
    records: RwLock<HashMap<ResponseId, AnswerRecord>>,
}

impl InMemoryResponseStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseStore for InMemoryResponseStore {
    fn append(&self, record: AnswerRecord) -> Result<ResponseId, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("response.append"))?;
        if records.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }
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
