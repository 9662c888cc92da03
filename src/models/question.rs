// src/models/question.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::quiz::Difficulty;

/// Represents a document of the `quizzes/{id}/questions` sub-collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: String,

    /// The text content of the question.
    pub text: String,

    /// Answer choices, in display order.
    pub options: Vec<String>,

    /// Index into `options` of the correct choice.
    pub correct_option: usize,

    /// Explanation shown after submission.
    #[serde(default)]
    pub explanation: Option<String>,

    /// Topic, e.g. "Quantitative", "Logical Reasoning".
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub difficulty: Option<Difficulty>,

    /// Weight of the question in the score.
    #[serde(default = "default_marks")]
    pub marks: i64,

    /// Display position inside the quiz.
    #[serde(default)]
    pub position: i64,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn default_marks() -> i64 {
    1
}

/// DTO for sending a question to a student (excludes answer and explanation).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub category: Option<String>,
    pub marks: i64,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        PublicQuestion {
            id: q.id,
            text: q.text,
            options: q.options,
            category: q.category,
            marks: q.marks,
        }
    }
}

fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    if options.len() < 2 {
        return Err(ValidationError::new("at_least_two_options"));
    }
    if options.len() > 10 {
        return Err(ValidationError::new("too_many_options"));
    }
    for opt in options {
        if opt.trim().is_empty() {
            return Err(ValidationError::new("option_cannot_be_empty"));
        }
        if opt.len() > 500 {
            return Err(ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

/// DTO for creating a new question.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_correct_option_in_range"))]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    pub correct_option: usize,
    #[validate(length(max = 4000))]
    pub explanation: Option<String>,
    #[validate(length(min = 1, max = 60))]
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    #[validate(range(min = 1, max = 100))]
    pub marks: Option<i64>,
    pub position: Option<i64>,
}

fn validate_correct_option_in_range(req: &CreateQuestionRequest) -> Result<(), ValidationError> {
    if req.correct_option >= req.options.len() {
        return Err(ValidationError::new("correct_option_out_of_range"));
    }
    Ok(())
}

/// DTO for updating a question. Fields are optional.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[validate(custom(function = validate_options))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
    #[validate(length(max = 4000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[validate(length(min = 1, max = 60))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[validate(range(min = 1, max = 100))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// Query parameters of `/api/quizzes/questions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionParams {
    pub quiz_id: Option<String>,
    pub id: Option<String>,
}
