//! Question collection state and the optimistic transaction runner.
//!
//! Both backends keep the live collection in a [`QuestionState`] behind an
//! `RwLock` and commit through [`run_optimistic`]. The persistent backend
//! additionally logs each [`WriteBatch`] before it is applied.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::question::{Question, QuestionId, ValidatedQuestion};
use crate::storage::traits::{
    QuestionTransaction, StorageError, TransactionBody, TransactionOptions, TransactionReport,
};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// A single buffered document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentWrite {
    /// Insert a new question document.
    Create(Question),
    /// Move an existing question to a new position.
    SetOrder {
        /// Target document.
        id: QuestionId,
        /// New order value.
        order: u64,
    },
}

/// Writes committed together. Either all apply or none do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    writes: Vec<DocumentWrite>,
}

impl WriteBatch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write.
    pub fn push(&mut self, write: DocumentWrite) {
        self.writes.push(write);
    }

    /// Number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The staged writes in commit order.
    #[must_use]
    pub fn writes(&self) -> &[DocumentWrite] {
        &self.writes
    }
}

#[derive(Debug, Default)]
pub(crate) struct QuestionState {
    by_id: HashMap<QuestionId, Question>,
    by_key: HashMap<String, QuestionId>,
    /// Bumped once per applied batch.
    version: u64,
}

impl QuestionState {
    pub(crate) fn from_questions(
        questions: impl IntoIterator<Item = Question>,
    ) -> Result<Self, StorageError> {
        let mut batch = WriteBatch::new();
        for q in questions {
            batch.push(DocumentWrite::Create(q));
        }
        let mut state = Self::default();
        state.apply(batch)?;
        Ok(state)
    }

    pub(crate) fn ordered(&self) -> Vec<Question> {
        let mut out: Vec<Question> = self.by_id.values().cloned().collect();
        out.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(crate) fn from_order(&self, min_order: u64) -> Vec<Question> {
        let mut out: Vec<Question> = self
            .by_id
            .values()
            .filter(|q| q.order >= min_order)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(crate) fn get(&self, id: QuestionId) -> Option<&Question> {
        self.by_id.get(&id)
    }

    pub(crate) fn by_idempotency_key(&self, key: &str) -> Option<&Question> {
        self.by_key.get(key).and_then(|id| self.by_id.get(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) const fn version(&self) -> u64 {
        self.version
    }

    /// Reject a batch that would not apply cleanly, without touching state.
    pub(crate) fn check(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut created: HashSet<QuestionId> = HashSet::new();
        let mut keys: HashSet<&str> = HashSet::new();

        for write in batch.writes() {
            match write {
                DocumentWrite::Create(q) => {
                    if self.by_id.contains_key(&q.id) || !created.insert(q.id) {
                        return Err(StorageError::DuplicateKey(q.id.to_string()));
                    }
                    if let Some(key) = q.idempotency_key.as_deref() {
                        if self.by_key.contains_key(key) || !keys.insert(key) {
                            return Err(StorageError::DuplicateKey(format!(
                                "idempotency key {key}"
                            )));
                        }
                    }
                }
                DocumentWrite::SetOrder { id, .. } => {
                    if !self.by_id.contains_key(id) && !created.contains(id) {
                        return Err(StorageError::QuestionNotFound(*id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Check then apply a batch atomically.
    pub(crate) fn apply(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
        self.check(&batch)?;
        for write in batch.writes {
            match write {
                DocumentWrite::Create(q) => {
                    if let Some(key) = q.idempotency_key.clone() {
                        self.by_key.insert(key, q.id);
                    }
                    self.by_id.insert(q.id, q);
                }
                DocumentWrite::SetOrder { id, order } => {
                    if let Some(q) = self.by_id.get_mut(&id) {
                        q.order = order;
                    }
                }
            }
        }
        self.version += 1;
        Ok(())
    }
}

/// One attempt's view of the collection.
struct OptimisticTransaction<'a> {
    state: &'a RwLock<QuestionState>,
    read_version: Option<u64>,
    batch: WriteBatch,
}

impl<'a> OptimisticTransaction<'a> {
    fn new(state: &'a RwLock<QuestionState>) -> Self {
        Self {
            state,
            read_version: None,
            batch: WriteBatch::new(),
        }
    }

    fn read<T>(
        &mut self,
        context: &'static str,
        f: impl FnOnce(&QuestionState) -> T,
    ) -> Result<T, StorageError> {
        if !self.batch.is_empty() {
            return Err(StorageError::InvalidTransaction(
                "reads must precede writes".to_string(),
            ));
        }
        let state = self.state.read().map_err(|_| lock_err(context))?;
        match self.read_version {
            None => self.read_version = Some(state.version()),
            Some(v) if v != state.version() => return Err(StorageError::StaleRead),
            Some(_) => {}
        }
        Ok(f(&state))
    }
}

impl QuestionTransaction for OptimisticTransaction<'_> {
    fn find_from_order(&mut self, min_order: u64) -> Result<Vec<Question>, StorageError> {
        self.read("txn.find_from_order", |s| s.from_order(min_order))
    }

    fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<Question>, StorageError> {
        self.read("txn.find_by_idempotency_key", |s| {
            s.by_idempotency_key(key).cloned()
        })
    }

    fn set_order(&mut self, id: QuestionId, order: u64) -> Result<(), StorageError> {
        self.batch.push(DocumentWrite::SetOrder { id, order });
        Ok(())
    }

    fn create(
        &mut self,
        question: ValidatedQuestion,
        order: u64,
        idempotency_key: Option<String>,
    ) -> Result<QuestionId, StorageError> {
        let id = QuestionId::new();
        self.batch.push(DocumentWrite::Create(question.into_question(
            id,
            order,
            idempotency_key,
        )));
        Ok(id)
    }
}

/// Run `body` until it commits without conflict or the attempt budget runs out.
///
/// `persist` is called under the state write lock with the batch about to be
/// applied; an error from it aborts the commit and leaves state untouched.
pub(crate) fn run_optimistic(
    state: &RwLock<QuestionState>,
    options: &TransactionOptions,
    body: &mut TransactionBody<'_>,
    mut persist: impl FnMut(&WriteBatch) -> Result<(), StorageError>,
) -> Result<TransactionReport, StorageError> {
    let max_attempts = options.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let mut txn = OptimisticTransaction::new(state);
        match body(&mut txn) {
            Ok(()) => {}
            Err(e) if e.is_stale() => {
                tracing::warn!(attempt, max_attempts, "transaction read went stale, retrying");
                std::thread::sleep(options.backoff_after(attempt));
                continue;
            }
            Err(e) => return Err(e),
        }

        let OptimisticTransaction {
            read_version,
            batch,
            ..
        } = txn;
        let writes = batch.len();
        if batch.is_empty() {
            return Ok(TransactionReport { attempts: attempt, writes });
        }

        let mut guard = state.write().map_err(|_| lock_err("txn.commit"))?;
        if read_version.is_some_and(|v| v != guard.version()) {
            drop(guard);
            tracing::warn!(attempt, max_attempts, "transaction commit conflicted, retrying");
            std::thread::sleep(options.backoff_after(attempt));
            continue;
        }

        guard.check(&batch)?;
        persist(&batch)?;
        guard.apply(batch)?;
        return Ok(TransactionReport { attempts: attempt, writes });
    }

    Err(StorageError::TransactionConflict {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{ChoiceOption, QuestionDraft};

    fn draft(text: &str) -> ValidatedQuestion {
        QuestionDraft::single_choice(text, vec![ChoiceOption::new("ok")])
            .validate()
            .unwrap()
    }

    fn seeded(texts: &[&str]) -> RwLock<QuestionState> {
        let questions = texts
            .iter()
            .enumerate()
            .map(|(i, t)| draft(t).into_question(QuestionId::new(), i as u64, None));
        RwLock::new(QuestionState::from_questions(questions).unwrap())
    }

    #[test]
    fn batch_with_unknown_target_is_rejected_whole() {
        let state = seeded(&["A"]);
        let mut batch = WriteBatch::new();
        batch.push(DocumentWrite::Create(
            draft("B").into_question(QuestionId::new(), 1, None),
        ));
        batch.push(DocumentWrite::SetOrder {
            id: QuestionId::new(),
            order: 3,
        });

        let mut guard = state.write().unwrap();
        let err = guard.apply(batch).unwrap_err();
        assert!(matches!(err, StorageError::QuestionNotFound(_)));
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.version(), 1);
    }

    #[test]
    fn duplicate_idempotency_key_is_rejected() {
        let state = RwLock::new(QuestionState::default());
        let mut batch = WriteBatch::new();
        for _ in 0..2 {
            batch.push(DocumentWrite::Create(draft("A").into_question(
                QuestionId::new(),
                0,
                Some("k1".to_string()),
            )));
        }
        let err = state.write().unwrap().apply(batch).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(_)));
    }

    #[test]
    fn reads_after_writes_are_rejected() {
        let state = seeded(&[]);
        let err = run_optimistic(
            &state,
            &TransactionOptions::default(),
            &mut |txn| {
                txn.create(draft("A"), 0, None)?;
                txn.find_from_order(0)?;
                Ok(())
            },
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransaction(_)));
        assert_eq!(state.read().unwrap().len(), 0);
    }

    #[test]
    fn concurrent_commit_forces_retry() {
        let state = seeded(&["A"]);
        let mut interfered = false;

        let report = run_optimistic(
            &state,
            &TransactionOptions::default(),
            &mut |txn| {
                let existing = txn.find_from_order(0)?;
                if !interfered {
                    interfered = true;
                    // Another writer commits between our read and our commit.
                    state
                        .write()
                        .unwrap()
                        .apply({
                            let mut b = WriteBatch::new();
                            b.push(DocumentWrite::Create(
                                draft("X").into_question(QuestionId::new(), 10, None),
                            ));
                            b
                        })
                        .unwrap();
                }
                for q in existing {
                    txn.set_order(q.id, q.order + 1)?;
                }
                txn.create(draft("B"), 0, None)?;
                Ok(())
            },
            |_| Ok(()),
        )
        .unwrap();

        assert_eq!(report.attempts, 2);
        let ordered = state.read().unwrap().ordered();
        let texts: Vec<&str> = ordered.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, ["B", "A", "X"]);
        let orders: Vec<u64> = ordered.iter().map(|q| q.order).collect();
        assert_eq!(orders, [0, 1, 11]);
    }

    #[test]
    fn exhausted_attempts_surface_conflict() {
        let state = seeded(&["A"]);
        let err = run_optimistic(
            &state,
            &TransactionOptions::with_max_attempts(3),
            &mut |txn| {
                txn.find_from_order(0)?;
                state
                    .write()
                    .unwrap()
                    .apply({
                        let mut b = WriteBatch::new();
                        b.push(DocumentWrite::Create(
                            draft("noise").into_question(QuestionId::new(), 99, None),
                        ));
                        b
                    })
                    .unwrap();
                txn.create(draft("B"), 0, None)?;
                Ok(())
            },
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::TransactionConflict { attempts: 3 }));
    }

    #[test]
    fn persist_failure_leaves_state_untouched() {
        let state = seeded(&["A"]);
        let err = run_optimistic(
            &state,
            &TransactionOptions::default(),
            &mut |txn| {
                txn.create(draft("B"), 0, None)?;
                Ok(())
            },
            |_| Err(StorageError::BackendError("disk full".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::BackendError(_)));
        assert_eq!(state.read().unwrap().len(), 1);
    }
}
