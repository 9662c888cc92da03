// src/handlers/attempts.rs

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;

use crate::{
    error::AppError,
    handlers::{
        ensure_plain_submission, exam::sync_session, refuse_students, require_id, to_json_list,
    },
    models::attempt::{AnswersRequest, AttemptParams, StartAttemptRequest},
    state::AppState,
    store::{self, ATTEMPTS, Direction},
    utils::jwt::Claims,
};

/// `GET /api/attempts`: one attempt by `?id=`, or a filtered list.
///
/// Students only see their own attempts.
pub async fn get_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AttemptParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = params.id {
        let (attempt, doc) = state.engine.load_attempt(&id).await?;
        claims.require_owner_or_staff(&attempt.user_id)?;
        return Ok(Json(doc.to_json()));
    }

    let mut query = store::Query::collection(ATTEMPTS).order_by("startedAt", Direction::Desc);
    let user_filter = if claims.is_staff() {
        params.user_id
    } else {
        Some(claims.user_id().to_string())
    };
    if let Some(user_id) = user_filter {
        query = query.eq("userId", user_id);
    }
    if let Some(quiz_id) = params.quiz_id {
        query = query.eq("quizId", quiz_id);
    }
    if let Some(status) = params.status {
        query = query.eq("status", status.as_str());
    }

    let docs = state.store.query(&query).await.map_err(|e| {
        tracing::error!("Failed to list attempts: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}

/// Starts (or resumes) an attempt for the caller.
/// Teacher or admin; students start through `/api/exam/verify`.
pub async fn create_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    refuse_students(&claims)?;
    let attempt = state
        .engine
        .start_attempt(claims.user_id(), &payload.quiz_id)
        .await?;
    sync_session(&state, &attempt).await?;

    Ok((StatusCode::CREATED, Json(attempt)))
}

/// Autosaves answers into the caller's running attempt.
pub async fn update_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AttemptParams>,
    Json(payload): Json<AnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    let attempt = state
        .engine
        .update_attempt(&id, claims.user_id(), payload.answers)
        .await?;
    Ok(Json(attempt))
}

/// Finalizes the caller's attempt and returns the result.
///
/// A second submission of the same attempt is rejected with 409. Attempts
/// opened through the exam flow are refused here.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AttemptParams>,
    Json(payload): Json<AnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    ensure_plain_submission(&state, &claims, &id).await?;
    let submitted = state
        .engine
        .submit_attempt(&id, claims.user_id(), payload.answers)
        .await;

    // Completed or closed on expiry: the caller's session follows the attempt.
    if matches!(
        submitted,
        Ok(_) | Err(AppError::BadRequest(_)) | Err(AppError::Conflict(_))
    ) {
        let (attempt, _) = state.engine.load_attempt(&id).await?;
        sync_session(&state, &attempt).await?;
    }

    Ok((StatusCode::CREATED, Json(submitted?)))
}

/// Abandons the caller's running attempt. Already-abandoned attempts are
/// left as they are.
pub async fn abandon_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AttemptParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    let attempt = state.engine.abandon_attempt(&id, claims.user_id()).await?;
    sync_session(&state, &attempt).await?;
    Ok(Json(attempt))
}

/// Removes an attempt record.
/// Admin only.
pub async fn delete_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AttemptParams>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_admin()?;
    let id = require_id(params.id)?;
    state.store.delete(ATTEMPTS, &id).await?;
    tracing::info!("Attempt {} deleted by {}", id, claims.user_id());
    Ok(StatusCode::NO_CONTENT)
}
