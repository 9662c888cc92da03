// src/models/result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-question outcome shown on the results review screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReview {
    pub question_id: String,
    pub selected_option: Option<usize>,
    pub correct_option: usize,
    pub is_correct: bool,
    pub marks_awarded: i64,
    pub marks: i64,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Represents a document of the `results` collection.
/// Written once when an attempt completes and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    #[serde(default)]
    pub id: String,
    pub attempt_id: String,
    pub quiz_id: String,
    pub user_id: String,
    #[serde(default)]
    pub quiz_title: String,
    pub score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub correct_answers: usize,
    pub total_questions: usize,
    pub time_taken_secs: i64,
    pub passed: bool,
    /// Dense rank among all results of the quiz at submission time.
    pub rank: u32,
    /// Share of earlier results with a strictly lower score.
    pub percentile: f64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub question_review: Vec<QuestionReview>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Row of the quiz leaderboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    pub score: i64,
    pub percentage: f64,
    pub time_taken_secs: i64,
    pub completed_at: DateTime<Utc>,
}

/// Query parameters of `/api/results`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultParams {
    pub id: Option<String>,
    pub quiz_id: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}
