//! # questionnaire - Ordered Survey Questions
//!
//! A store for survey questions kept in an explicit display order, plus the
//! answers respondents submit.
//!
//! ## Core Concepts
//!
//! - **Question**: a single- or multi-choice prompt with a numeric `order`
//! - **Ordered insert**: placing a question at position *p* moves every
//!   question at or after *p* down by one, atomically
//! - **Transaction**: optimistic read-then-write unit, retried on conflict
//! - **Answer record**: an unvalidated map from question to chosen labels
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use questionnaire::{ChoiceOption, InsertQuestion, QuestionDraft, SurveyEngine};
//! use questionnaire::storage::{InMemoryQuestionStore, InMemoryResponseStore};
//!
//! let engine = SurveyEngine::new(
//!     Arc::new(InMemoryQuestionStore::new()),
//!     Arc::new(InMemoryResponseStore::new()),
//! );
//!
//! let draft = QuestionDraft::single_choice("Coffee or tea?", vec![
//!     ChoiceOption::new("Coffee"),
//!     ChoiceOption::new("Tea"),
//! ]);
//! let outcome = engine.insert_question(InsertQuestion::new(draft, 0))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod answer;
pub mod error;
pub mod question;

// Storage and execution
pub mod config;
pub mod engine;
pub mod storage;

// Server mode
#[cfg(feature = "transport-http")]
pub mod transport;

pub use answer::{AnswerRecord, AnswerSubmission, ResponseId};
pub use engine::{InsertOutcome, InsertQuestion, SurveyEngine};
pub use error::{ExecutionError, SurveyError, SurveyResult, ValidationError};
pub use question::{ChoiceOption, Question, QuestionDraft, QuestionId, QuestionType};
pub use storage::{QuestionStore, ResponseStore, StorageError, TransactionOptions};
