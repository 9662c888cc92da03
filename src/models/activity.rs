// src/models/activity.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Registered,
    Login,
    QuizCreated,
    QuizStarted,
    QuizSubmitted,
    QuizAbandoned,
    ReauthFailed,
    ReauthLocked,
}

/// Represents a document of the `activity_logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub action: ActivityAction,
    #[serde(default)]
    pub details: Value,
    pub at: DateTime<Utc>,
}

/// Query parameters of `/api/users/activity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityParams {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}
