//! Survey engine: ordered insertion, ordered retrieval and answer capture.
//!
//! The engine is synchronous and holds no locks of its own. Stores are passed
//! in explicitly, and every insert runs as one storage transaction, so the
//! engine can be cloned freely across request handlers.

mod ordering;

pub use ordering::{plan_shift, OrderShift};

use std::sync::Arc;

use crate::answer::{AnswerRecord, AnswerSubmission, ResponseId};
use crate::error::{ExecutionError, SurveyResult};
use crate::question::{validate_idempotency_key, Question, QuestionDraft, QuestionId};
use crate::storage::{QuestionStore, ResponseStore, StorageError, TransactionOptions};

/// Request to insert a question at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertQuestion {
    /// Question content.
    pub draft: QuestionDraft,
    /// Target position. Values past the end append.
    pub position: u64,
    /// Optional client key making retries safe.
    pub idempotency_key: Option<String>,
}

impl InsertQuestion {
    /// Insert `draft` at `position`.
    #[must_use]
    pub fn new(draft: QuestionDraft, position: u64) -> Self {
        Self {
            draft,
            position,
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of [`SurveyEngine::insert_question`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Id of the inserted (or previously inserted) question.
    pub id: QuestionId,
    /// Its order right after the call.
    pub order: u64,
    /// False when the idempotency key had already been applied.
    pub created: bool,
    /// Existing questions moved down by this insert.
    pub shifted: usize,
    /// Transaction attempts used.
    pub attempts: u32,
}

#[derive(Clone, Copy)]
enum Phase {
    Read,
    Write,
}

/// Survey execution engine.
#[derive(Clone)]
pub struct SurveyEngine {
    questions: Arc<dyn QuestionStore>,
    responses: Arc<dyn ResponseStore>,
    transaction: TransactionOptions,
}

impl SurveyEngine {
    /// Create a new engine using the given stores.
    #[must_use]
    pub fn new(questions: Arc<dyn QuestionStore>, responses: Arc<dyn ResponseStore>) -> Self {
        Self {
            questions,
            responses,
            transaction: TransactionOptions::default(),
        }
    }

    /// Override the transaction retry policy.
    #[must_use]
    pub fn with_transaction_options(mut self, options: TransactionOptions) -> Self {
        self.transaction = options;
        self
    }

    /// The transaction retry policy in use.
    pub fn transaction_options(&self) -> &TransactionOptions {
        &self.transaction
    }

    /// Get a reference to the question store.
    pub fn question_store(&self) -> &Arc<dyn QuestionStore> {
        &self.questions
    }

    /// Get a reference to the response store.
    pub fn response_store(&self) -> &Arc<dyn ResponseStore> {
        &self.responses
    }

    /// Insert a question at `request.position`, moving every question at or
    /// after that position down by one.
    ///
    /// Validation happens before any storage access. The lookup, the shifts
    /// and the new document commit as one transaction; a concurrent insert
    /// forces a retry rather than a duplicate order.
    ///
    /// # Errors
    /// - `Validation` for an invalid draft or idempotency key
    /// - `Execution::StorageRead` / `StorageWrite` for backend failures
    /// - `Execution::TransactionConflict` when retries are exhausted
    pub fn insert_question(&self, request: InsertQuestion) -> SurveyResult<InsertOutcome> {
        let InsertQuestion {
            draft,
            position,
            idempotency_key,
        } = request;

        let validated = draft.validate()?;
        if let Some(key) = idempotency_key.as_deref() {
            validate_idempotency_key(key)?;
        }

        let mut phase = Phase::Read;
        let mut outcome: Option<(QuestionId, u64, bool, usize)> = None;

        let result = self.questions.run_transaction(&self.transaction, &mut |txn| {
            phase = Phase::Read;
            outcome = None;

            if let Some(key) = idempotency_key.as_deref() {
                if let Some(existing) = txn.find_by_idempotency_key(key)? {
                    outcome = Some((existing.id, existing.order, false, 0));
                    return Ok(());
                }
            }

            let affected = txn.find_from_order(position)?;
            let shifts = plan_shift(&affected, position)?;

            phase = Phase::Write;
            for shift in &shifts {
                txn.set_order(shift.id, shift.to)?;
            }
            let id = txn.create(validated.clone(), position, idempotency_key.clone())?;
            outcome = Some((id, position, true, shifts.len()));
            Ok(())
        });

        let report = result.map_err(|e| match phase {
            Phase::Read => ExecutionError::read(e),
            Phase::Write => ExecutionError::write(e),
        })?;

        let (id, order, created, shifted) = outcome.ok_or_else(|| {
            ExecutionError::write(StorageError::InvalidTransaction(
                "transaction committed without an outcome".to_string(),
            ))
        })?;

        if created {
            tracing::info!(
                question_id = %id,
                order,
                shifted,
                attempts = report.attempts,
                "question inserted"
            );
        } else {
            tracing::debug!(question_id = %id, order, "idempotent insert replayed");
        }

        Ok(InsertOutcome {
            id,
            order,
            created,
            shifted,
            attempts: report.attempts,
        })
    }

    /// All questions ascending by order. Empty when none exist.
    ///
    /// # Errors
    /// `Execution::StorageRead` on backend failure.
    pub fn list_questions(&self) -> SurveyResult<Vec<Question>> {
        Ok(self
            .questions
            .list_ordered()
            .map_err(ExecutionError::read)?)
    }

    /// Number of stored questions.
    ///
    /// # Errors
    /// `Execution::StorageRead` on backend failure.
    pub fn question_count(&self) -> SurveyResult<usize> {
        Ok(self.questions.count().map_err(ExecutionError::read)?)
    }

    /// Record a submission. Keys and labels are not checked against stored
    /// questions.
    ///
    /// # Errors
    /// `Execution::StorageWrite` on backend failure.
    pub fn submit_answers(
        &self,
        submission: AnswerSubmission,
        client_ip: Option<String>,
    ) -> SurveyResult<ResponseId> {
        let record = AnswerRecord::new(submission, client_ip);
        let answered = record.answers.len();
        let id = self
            .responses
            .append(record)
            .map_err(ExecutionError::write)?;
        tracing::info!(response_id = %id, answered, "answers submitted");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{SurveyError, ValidationError};
    use crate::question::ChoiceOption;
    use crate::storage::{
        InMemoryQuestionStore, InMemoryResponseStore, TransactionBody, TransactionReport,
    };

    /// Counts every call, then delegates.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryQuestionStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QuestionStore for CountingStore {
        fn list_ordered(&self) -> Result<Vec<Question>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list_ordered()
        }

        fn get(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id)
        }

        fn count(&self) -> Result<usize, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.count()
        }

        fn run_transaction(
            &self,
            options: &TransactionOptions,
            body: &mut TransactionBody<'_>,
        ) -> Result<TransactionReport, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.run_transaction(options, body)
        }
    }

    /// Every call fails.
    struct BrokenStore;

    impl QuestionStore for BrokenStore {
        fn list_ordered(&self) -> Result<Vec<Question>, StorageError> {
            Err(StorageError::BackendError("offline".to_string()))
        }

        fn get(&self, _id: QuestionId) -> Result<Option<Question>, StorageError> {
            Err(StorageError::BackendError("offline".to_string()))
        }

        fn count(&self) -> Result<usize, StorageError> {
            Err(StorageError::BackendError("offline".to_string()))
        }

        fn run_transaction(
            &self,
            _options: &TransactionOptions,
            _body: &mut TransactionBody<'_>,
        ) -> Result<TransactionReport, StorageError> {
            Err(StorageError::BackendError("offline".to_string()))
        }
    }

    impl ResponseStore for BrokenStore {
        fn append(&self, _record: AnswerRecord) -> Result<ResponseId, StorageError> {
            Err(StorageError::BackendError("offline".to_string()))
        }

        fn get(&self, _id: ResponseId) -> Result<Option<AnswerRecord>, StorageError> {
            Ok(None)
        }

        fn count(&self) -> Result<usize, StorageError> {
            Ok(0)
        }
    }

    fn engine() -> SurveyEngine {
        SurveyEngine::new(
            Arc::new(InMemoryQuestionStore::new()),
            Arc::new(InMemoryResponseStore::new()),
        )
    }

    fn single(text: &str) -> QuestionDraft {
        QuestionDraft::single_choice(text, vec![ChoiceOption::new("yes"), ChoiceOption::new("no")])
    }

    fn texts(engine: &SurveyEngine) -> Vec<String> {
        engine
            .list_questions()
            .unwrap()
            .into_iter()
            .map(|q| q.text)
            .collect()
    }

    #[test]
    fn insert_into_middle_shifts_followers() {
        let engine = engine();
        engine.insert_question(InsertQuestion::new(single("A"), 0)).unwrap();
        engine.insert_question(InsertQuestion::new(single("B"), 1)).unwrap();

        let outcome = engine
            .insert_question(InsertQuestion::new(single("C"), 1))
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.order, 1);
        assert_eq!(outcome.shifted, 1);

        let listed = engine.list_questions().unwrap();
        let pairs: Vec<(&str, u64)> = listed.iter().map(|q| (q.text.as_str(), q.order)).collect();
        assert_eq!(pairs, [("A", 0), ("C", 1), ("B", 2)]);
    }

    #[test]
    fn multi_choice_without_max_is_rejected_before_storage() {
        let store = Arc::new(CountingStore::default());
        let engine = SurveyEngine::new(store.clone(), Arc::new(InMemoryResponseStore::new()));

        let draft = QuestionDraft::multi_choice("Pick", vec![ChoiceOption::new("a")], None);
        let err = engine
            .insert_question(InsertQuestion::new(draft, 0))
            .unwrap_err();

        assert!(matches!(
            err,
            SurveyError::Validation(ValidationError::MissingMaxSelections)
        ));
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn bad_idempotency_key_is_rejected_before_storage() {
        let store = Arc::new(CountingStore::default());
        let engine = SurveyEngine::new(store.clone(), Arc::new(InMemoryResponseStore::new()));

        let err = engine
            .insert_question(InsertQuestion::new(single("A"), 0).idempotency_key(""))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn idempotent_replay_returns_same_id_without_shifting() {
        let engine = engine();
        engine.insert_question(InsertQuestion::new(single("A"), 0)).unwrap();

        let first = engine
            .insert_question(InsertQuestion::new(single("B"), 0).idempotency_key("req-1"))
            .unwrap();
        let replay = engine
            .insert_question(InsertQuestion::new(single("B"), 0).idempotency_key("req-1"))
            .unwrap();

        assert!(first.created);
        assert!(!replay.created);
        assert_eq!(first.id, replay.id);
        assert_eq!(texts(&engine), ["B", "A"]);
    }

    #[test]
    fn list_twice_is_identical() {
        let engine = engine();
        for (i, t) in ["A", "B", "C"].iter().enumerate() {
            engine
                .insert_question(InsertQuestion::new(single(t), i as u64 * 3))
                .unwrap();
        }
        assert_eq!(engine.list_questions().unwrap(), engine.list_questions().unwrap());
    }

    #[test]
    fn storage_failures_are_typed() {
        let broken = Arc::new(BrokenStore);
        let engine = SurveyEngine::new(broken.clone(), broken);

        let err = engine.list_questions().unwrap_err();
        assert!(matches!(
            err,
            SurveyError::Execution(ExecutionError::StorageRead { .. })
        ));

        let err = engine
            .submit_answers(AnswerSubmission::new().answer("q", ["a"]), None)
            .unwrap_err();
        assert!(matches!(
            err,
            SurveyError::Execution(ExecutionError::StorageWrite { .. })
        ));

        let err = engine
            .insert_question(InsertQuestion::new(single("A"), 0))
            .unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn submit_records_client_ip_and_timestamp() {
        let engine = engine();
        let id = engine
            .submit_answers(
                AnswerSubmission::new().answer("q1", ["red"]),
                Some("192.0.2.1".to_string()),
            )
            .unwrap();

        let record = engine.response_store().get(id).unwrap().unwrap();
        assert_eq!(record.client_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(record.answers["q1"], ["red"]);
        assert!(record.submitted_at <= chrono::Utc::now());
    }
}
