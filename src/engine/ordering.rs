//! Position shifting for ordered inserts.

use crate::question::{Question, QuestionId};
use crate::storage::StorageError;

/// One question moving one slot down the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderShift {
    /// Question being moved.
    pub id: QuestionId,
    /// Order before the insert.
    pub from: u64,
    /// Order after the insert.
    pub to: u64,
}

/// Shifts needed to open `target` for a new question.
///
/// Every question at or after `target` moves up by one; gaps further down are
/// not closed. The increments are independent, so the result can be applied
/// in any order inside a single batch.
///
/// # Errors
/// `InvalidTransaction` if a shifted order would overflow `u64`.
pub fn plan_shift(existing: &[Question], target: u64) -> Result<Vec<OrderShift>, StorageError> {
    existing
        .iter()
        .filter(|q| q.order >= target)
        .map(|q| {
            let to = q.order.checked_add(1).ok_or_else(|| {
                StorageError::InvalidTransaction(format!("order overflow shifting question {}", q.id))
            })?;
            Ok(OrderShift {
                id: q.id,
                from: q.order,
                to,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{ChoiceOption, QuestionDraft};

    fn at(order: u64) -> Question {
        QuestionDraft::single_choice("q", vec![ChoiceOption::new("a")])
            .validate()
            .unwrap()
            .into_question(QuestionId::new(), order, None)
    }

    #[test]
    fn shifts_only_at_or_after_target() {
        let items = [at(0), at(1), at(2), at(7)];
        let plan = plan_shift(&items, 1).unwrap();
        let moves: Vec<(u64, u64)> = plan.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(moves, [(1, 2), (2, 3), (7, 8)]);
    }

    #[test]
    fn append_past_end_shifts_nothing() {
        let items = [at(0), at(1)];
        assert!(plan_shift(&items, 2).unwrap().is_empty());
        assert!(plan_shift(&items, 500).unwrap().is_empty());
    }

    #[test]
    fn overflow_is_reported() {
        let items = [at(u64::MAX)];
        assert!(matches!(
            plan_shift(&items, u64::MAX),
            Err(StorageError::InvalidTransaction(_))
        ));
    }
}
