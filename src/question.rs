//! Question documents and their validity rules.
//!
//! A [`QuestionDraft`] is what a caller hands in: everything except the
//! store-assigned id and the position. Validation turns it into a
//! [`ValidatedQuestion`], which is the only thing the engine will stage into a
//! transaction. The stored form is [`Question`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length in bytes of a client-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// Unique identifier for a stored question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(uuid::Uuid);

impl QuestionId {
    /// Creates a new random question ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for QuestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many options a respondent may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Exactly one option.
    SingleChoice,
    /// Up to `maxSelections` options.
    MultiChoice,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleChoice => write!(f, "single_choice"),
            Self::MultiChoice => write!(f, "multi_choice"),
        }
    }
}

/// A selectable option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Label shown to the respondent and echoed back on submission.
    pub label: String,
    /// Optional icon reference.
    #[serde(default)]
    pub icon: Option<String>,
}

impl ChoiceOption {
    /// Option without an icon.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            icon: None,
        }
    }

    /// Option with an icon.
    #[must_use]
    pub fn with_icon(label: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            icon: Some(icon.into()),
        }
    }
}

/// Caller-provided question content, before id and position are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    /// Single or multi choice; `type` on the wire.
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Prompt text.
    pub text: String,
    /// Whether the respondent may skip it.
    pub can_skip: bool,
    /// Selectable options, in display order.
    pub options: Vec<ChoiceOption>,
    /// Selection cap. Required for multi choice, ignored for single choice.
    /// Signed so that negative input reaches validation instead of failing
    /// to parse.
    #[serde(default)]
    pub max_selections: Option<i64>,
}

impl QuestionDraft {
    /// Draft for a single-choice question.
    #[must_use]
    pub fn single_choice(text: impl Into<String>, options: Vec<ChoiceOption>) -> Self {
        Self {
            kind: QuestionType::SingleChoice,
            text: text.into(),
            can_skip: false,
            options,
            max_selections: None,
        }
    }

    /// Draft for a multi-choice question.
    #[must_use]
    pub fn multi_choice(
        text: impl Into<String>,
        options: Vec<ChoiceOption>,
        max_selections: Option<i64>,
    ) -> Self {
        Self {
            kind: QuestionType::MultiChoice,
            text: text.into(),
            can_skip: false,
            options,
            max_selections,
        }
    }

    /// Mark the question as skippable.
    #[must_use]
    pub fn skippable(mut self) -> Self {
        self.can_skip = true;
        self
    }

    /// Check the item-validity rules and normalize the draft.
    ///
    /// `maxSelections` must be present and positive for `multi_choice`; for
    /// `single_choice` any supplied value is dropped.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] describing the first violated rule.
    pub fn validate(self) -> Result<ValidatedQuestion, ValidationError> {
        let max_selections = match self.kind {
            QuestionType::SingleChoice => None,
            QuestionType::MultiChoice => {
                let value = self
                    .max_selections
                    .ok_or(ValidationError::MissingMaxSelections)?;
                let positive = u32::try_from(value)
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or(ValidationError::InvalidMaxSelections { value })?;
                Some(positive)
            }
        };

        Ok(ValidatedQuestion {
            kind: self.kind,
            text: self.text,
            can_skip: self.can_skip,
            options: self.options,
            max_selections,
        })
    }
}

/// A draft that passed [`QuestionDraft::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuestion {
    kind: QuestionType,
    text: String,
    can_skip: bool,
    options: Vec<ChoiceOption>,
    max_selections: Option<u32>,
}

impl ValidatedQuestion {
    /// The question type.
    #[must_use]
    pub const fn kind(&self) -> QuestionType {
        self.kind
    }

    /// Materialize the stored document.
    #[must_use]
    pub fn into_question(
        self,
        id: QuestionId,
        order: u64,
        idempotency_key: Option<String>,
    ) -> Question {
        Question {
            id,
            order,
            kind: self.kind,
            text: self.text,
            can_skip: self.can_skip,
            options: self.options,
            max_selections: self.max_selections,
            idempotency_key,
        }
    }
}

/// A stored question.
///
/// Only `order` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Document id.
    pub id: QuestionId,
    /// Display position; unique across the collection.
    pub order: u64,
    /// Single or multi choice.
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Prompt text.
    pub text: String,
    /// Whether the respondent may skip it.
    pub can_skip: bool,
    /// Selectable options.
    pub options: Vec<ChoiceOption>,
    /// Selection cap, present only for multi choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
    /// Key of the request that created it. Stored for replay detection and
    /// never listed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Check a client-supplied idempotency key.
///
/// # Errors
/// Rejects empty keys and keys longer than [`MAX_IDEMPOTENCY_KEY_LEN`].
pub fn validate_idempotency_key(key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::EmptyIdempotencyKey);
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "idempotencyKey".to_string(),
            max_length: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }
    Ok(())
}
