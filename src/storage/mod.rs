//! Storage layer for questions and answers.
//!
//! The traits define the abstract interface; `memory` and (behind the
//! `persistent` feature) `persistent` provide backends.

mod memory;
mod state;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryQuestionStore, InMemoryResponseStore};
pub use state::{DocumentWrite, WriteBatch};
pub use traits::{
    QuestionStore, QuestionTransaction, ResponseStore, StorageError, TransactionBody,
    TransactionOptions, TransactionReport,
};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentStores};
