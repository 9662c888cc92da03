// src/models/attempt.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Selected option index per question id.
pub type Answers = BTreeMap<String, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// Represents a document of the `attempts` collection.
///
/// Created once per exam start and mutated while the exam runs; the score
/// fields are merged in when the attempt completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub status: AttemptStatus,

    #[serde(default)]
    pub answers: Answers,

    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    /// Submissions after this instant are refused.
    pub expires_at: DateTime<Utc>,

    /// Opened through the guarded exam flow after the entry password check.
    #[serde(default)]
    pub verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// DTO carrying answers for autosave or final submission.
#[derive(Debug, Default, Deserialize)]
pub struct AnswersRequest {
    #[serde(default)]
    pub answers: Answers,
}

/// DTO for starting an attempt outside the guarded exam flow.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
    pub quiz_id: String,
}

/// Query parameters of `/api/attempts`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptParams {
    pub id: Option<String>,
    pub quiz_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<AttemptStatus>,
}
