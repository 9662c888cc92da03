// src/models/ai_content.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Represents a document of the `ai_content` collection: generated
/// explanations, hints or question drafts kept for reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiContent {
    #[serde(default)]
    pub id: String,
    /// e.g. "explanation", "hint", "question_draft".
    pub kind: String,
    pub prompt: String,
    pub content: String,
    #[serde(default)]
    pub quiz_id: Option<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// DTO for storing generated content.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAiContentRequest {
    #[validate(length(min = 1, max = 40))]
    pub kind: String,
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[validate(length(min = 1, max = 20000))]
    pub content: String,
    pub quiz_id: Option<String>,
}

/// DTO for updating stored content. Fields are optional.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAiContentRequest {
    #[validate(length(min = 1, max = 40))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[validate(length(min = 1, max = 4000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[validate(length(min = 1, max = 20000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<String>,
}

/// Query parameters of `/api/ai`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiContentParams {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub quiz_id: Option<String>,
}
