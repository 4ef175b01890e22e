//! Error types for the questionnaire store.
//!
//! All errors are strongly typed using thiserror so that callers can match on
//! specific conditions. Storage backends report [`StorageError`]; the engine
//! lifts those into [`ExecutionError`] tagged with the direction (read or write)
//! of the failing step.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised before any storage access.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A multi-choice question arrived without a selection cap.
    #[error("maxSelections is required for multi_choice questions")]
    MissingMaxSelections,

    /// The selection cap is zero, negative or too large.
    #[error("maxSelections must be a positive integer (got {value})")]
    InvalidMaxSelections {
        /// The rejected value.
        value: i64,
    },

    /// Blank `Idempotency-Key`.
    #[error("Idempotency key cannot be empty")]
    EmptyIdempotencyKey,

    /// A string field is longer than allowed.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Wire name of the field.
        field: String,
        /// Maximum accepted length in bytes.
        max_length: usize,
    },
}

/// Execution errors that occur while the engine talks to storage.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Reading from storage failed.
    #[error("Storage read failed: {message}")]
    StorageRead {
        /// Backend message.
        message: String,
    },

    /// Writing to storage failed; nothing from the attempt was applied.
    #[error("Storage write failed: {message}")]
    StorageWrite {
        /// Backend message.
        message: String,
    },

    /// The transaction lost every attempt to concurrent writers.
    #[error("Transaction aborted after {attempts} conflicting attempts")]
    TransactionConflict {
        /// Attempts made.
        attempts: u32,
    },
}

impl ExecutionError {
    /// Lift a storage error raised on the read path.
    #[must_use]
    pub fn read(err: StorageError) -> Self {
        match err {
            StorageError::TransactionConflict { attempts } => Self::TransactionConflict { attempts },
            other => Self::StorageRead {
                message: other.to_string(),
            },
        }
    }

    /// Lift a storage error raised on the write path.
    #[must_use]
    pub fn write(err: StorageError) -> Self {
        match err {
            StorageError::TransactionConflict { attempts } => Self::TransactionConflict { attempts },
            other => Self::StorageWrite {
                message: other.to_string(),
            },
        }
    }
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum SurveyError {
    /// Rejected input; nothing was written.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage or transaction failure.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Bug or broken invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl SurveyError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::TransactionConflict { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for engine operations.
pub type SurveyResult<T> = Result<T, SurveyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_max_selections() {
        let err = ValidationError::MissingMaxSelections;
        assert!(err.to_string().contains("maxSelections is required"));

        let err = ValidationError::InvalidMaxSelections { value: 0 };
        assert!(err.to_string().contains("got 0"));
    }

    #[test]
    fn test_execution_error_from_storage_read() {
        let err = ExecutionError::read(StorageError::BackendError("disk gone".to_string()));
        assert!(matches!(err, ExecutionError::StorageRead { .. }));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_execution_error_keeps_conflict() {
        let err = ExecutionError::write(StorageError::TransactionConflict { attempts: 5 });
        assert!(matches!(err, ExecutionError::TransactionConflict { attempts: 5 }));
        assert!(err.to_string().contains("5 conflicting attempts"));
    }

    #[test]
    fn test_survey_error_from_validation() {
        let err: SurveyError = ValidationError::EmptyIdempotencyKey.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_survey_error_retryable() {
        let err: SurveyError = ExecutionError::TransactionConflict { attempts: 3 }.into();
        assert!(err.is_execution());
        assert!(err.is_retryable());

        let err: SurveyError = ExecutionError::StorageWrite {
            message: "io".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_survey_error_internal() {
        let err = SurveyError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(err.to_string().contains("unexpected state"));
    }
}
