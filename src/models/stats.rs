// src/models/stats.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryStat {
    pub correct: i64,
    pub total: i64,
}

impl CategoryStat {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.total as f64
        }
    }
}

/// Represents `user_stats/{uid}`: per-user analytics across all results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub user_id: String,
    pub tests_taken: i64,
    pub tests_passed: i64,
    pub total_correct: i64,
    pub total_questions: i64,
    pub total_time_secs: i64,
    /// Mean of result percentages.
    pub average_percentage: f64,
    pub highest_percentage: f64,
    pub category_breakdown: BTreeMap<String, CategoryStat>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
