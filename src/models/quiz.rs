// src/models/quiz.rs

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::Validate;

use crate::config::DEFAULT_PASSING_PERCENTAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Aggregates over every completed attempt of a quiz.
/// `averageScore` and `highestScore` are in marks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizStats {
    pub total_attempts: i64,
    pub passed_attempts: i64,
    pub average_score: f64,
    pub highest_score: i64,
    pub pass_rate: f64,
}

/// Represents a document of the `quizzes` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    #[serde(default)]
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub difficulty: Difficulty,

    /// Time limit in minutes.
    pub duration_minutes: i64,

    /// Maintained as questions are added or removed.
    #[serde(default)]
    pub question_count: i64,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Companies whose hiring tests the quiz resembles (e.g., "TCS").
    #[serde(default)]
    pub company_tags: Vec<String>,

    #[serde(default)]
    pub is_published: bool,

    #[serde(default)]
    pub is_recommended: bool,

    #[serde(default = "default_passing_percentage")]
    pub passing_percentage: f64,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub stats: QuizStats,

    /// Bumped whenever an attempt is opened on the quiz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_passing_percentage() -> f64 {
    DEFAULT_PASSING_PERCENTAGE
}

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 .&+\-]{0,39}$").expect("valid tag regex"));

/// Tags are short labels: letters, digits, spaces and `.&+-`.
fn validate_tags(tags: &[String]) -> Result<(), validator::ValidationError> {
    if tags.len() > 20 {
        return Err(validator::ValidationError::new("too_many_tags"));
    }
    for tag in tags {
        if !TAG_PATTERN.is_match(tag) {
            return Err(validator::ValidationError::new("invalid_tag"));
        }
    }
    Ok(())
}

/// DTO for creating a quiz.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Title is required (max 200 characters)."))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    #[validate(range(min = 1, max = 600, message = "Duration must be 1 to 600 minutes."))]
    pub duration_minutes: i64,
    #[validate(custom(function = validate_tags))]
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(custom(function = validate_tags))]
    #[serde(default)]
    pub company_tags: Vec<String>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub is_recommended: bool,
    #[validate(range(min = 0.0, max = 100.0))]
    pub passing_percentage: Option<f64>,
}

/// DTO for updating a quiz. Fields are optional.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[validate(range(min = 1, max = 600))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[validate(custom(function = validate_tags))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[validate(custom(function = validate_tags))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_recommended: Option<bool>,
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passing_percentage: Option<f64>,
}

/// Query parameters of `/api/quizzes`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizParams {
    pub id: Option<String>,
    pub company_tag: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub is_published: Option<bool>,
    pub is_recommended: Option<bool>,
}
