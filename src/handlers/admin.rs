// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::AppState, utils::jwt::Claims};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamLockParams {
    pub user_id: String,
}

/// Lifts a user's re-verification lock and returns them to where their
/// exam flow halted.
/// Admin only.
pub async fn reset_exam_lock(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ExamLockParams>,
) -> Result<impl IntoResponse, AppError> {
    let shared = state
        .sessions
        .existing(&params.user_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No exam session for user '{}'", params.user_id)))?;

    let mut session = shared.lock().await;
    let was_locked = session.throttle().is_locked();
    session.reset_lock();

    tracing::info!(
        "Admin {} reset exam lock of {} (locked: {})",
        claims.user_id(),
        params.user_id,
        was_locked
    );

    Ok(Json(json!({
        "userId": params.user_id,
        "wasLocked": was_locked,
        "state": session.screen(),
    })))
}
