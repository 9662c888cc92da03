// src/utils/activity.rs

use chrono::Utc;
use serde_json::Value;

use crate::{
    models::activity::{ActivityAction, ActivityLog},
    store::{ACTIVITY_LOGS, DocumentStore, to_fields},
};

/// Appends to `activity_logs`. Best effort: a failed write is logged and
/// swallowed so it never fails the operation being recorded.
pub async fn record(store: &dyn DocumentStore, user_id: &str, action: ActivityAction, details: Value) {
    let entry = ActivityLog {
        id: String::new(),
        user_id: user_id.to_string(),
        action,
        details,
        at: Utc::now(),
    };

    let fields = match to_fields(&entry) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("Failed to encode activity log: {}", e);
            return;
        }
    };

    if let Err(e) = store.create(ACTIVITY_LOGS, fields).await {
        tracing::warn!("Failed to record {:?} for user {}: {}", action, user_id, e);
    }
}
