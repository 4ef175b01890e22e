//! Answer submissions.
//!
//! Answers are accepted as-is: keys are question ids as strings and values are
//! the selected option labels, with no cross-check against stored questions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a stored answer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(uuid::Uuid);

impl ResponseId {
    /// Creates a new random response ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ResponseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound payload: question id -> selected labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    /// Selected labels keyed by question.
    pub answers: BTreeMap<String, Vec<String>>,
}

impl AnswerSubmission {
    /// Empty submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the selections for one question.
    #[must_use]
    pub fn answer<I, S>(mut self, question: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .insert(question.into(), labels.into_iter().map(Into::into).collect());
        self
    }
}

/// Immutable stored record of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    /// Record id.
    pub id: ResponseId,
    /// Selected labels keyed by question, as submitted.
    pub answers: BTreeMap<String, Vec<String>>,
    /// Server time of receipt.
    pub submitted_at: DateTime<Utc>,
    /// Peer address of the submitting connection. Advisory only.
    #[serde(default)]
    pub client_ip: Option<String>,
}

impl AnswerRecord {
    /// Stamp a submission with a fresh id and the current time.
    #[must_use]
    pub fn new(submission: AnswerSubmission, client_ip: Option<String>) -> Self {
        Self {
            id: ResponseId::new(),
            answers: submission.answers,
            submitted_at: Utc::now(),
            client_ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_wire_field_names() {
        let submission = AnswerSubmission::new().answer("q1", ["red", "blue"]);
        let record = AnswerRecord::new(submission, Some("10.0.0.7".to_string()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["answers"]["q1"][1], "blue");
        assert_eq!(json["clientIp"], "10.0.0.7");
        assert!(json.get("submittedAt").is_some());
    }

    #[test]
    fn submission_accepts_arbitrary_keys() {
        let parsed: AnswerSubmission = serde_json::from_str(
            r#"{"answers": {"not-a-question": [], "x": ["free text"]}}"#,
        )
        .unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert!(parsed.answers["not-a-question"].is_empty());
    }
}
