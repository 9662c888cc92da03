// src/handlers/results.rs

use std::{collections::HashSet, convert::Infallible, sync::Arc};

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::AppError,
    handlers::{ensure_plain_submission, exam::sync_session, page_size, require_id, to_json_list},
    models::{
        attempt::Answers,
        result::{ExamResult, LeaderboardEntry, ResultParams},
        user::User,
    },
    state::AppState,
    store::{self, Direction, DocumentStore, RESULTS, Subscription, USERS},
    utils::jwt::Claims,
};

/// `GET /api/results`: one result by `?id=`, or a filtered list, newest
/// first. Students only see their own results.
pub async fn get_results(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ResultParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = params.id {
        let doc = store
            .get(RESULTS, &id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Result '{}' not found", id)))?;
        let owner = doc.field("userId").and_then(Value::as_str).unwrap_or_default();
        claims.require_owner_or_staff(owner)?;
        return Ok(Json(doc.to_json()));
    }

    let mut query = store::Query::collection(RESULTS)
        .order_by("completedAt", Direction::Desc)
        .limit(page_size(params.limit, 50));
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

    let docs = store.query(&query).await.map_err(|e| {
        tracing::error!("Failed to list results: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResultRequest {
    pub attempt_id: String,
    #[serde(default)]
    pub answers: Answers,
}

/// Results are only ever created by submitting their attempt; this is the
/// same submission addressed by attempt id.
pub async fn create_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateResultRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_plain_submission(&state, &claims, &payload.attempt_id).await?;
    let result = state
        .engine
        .submit_attempt(&payload.attempt_id, claims.user_id(), payload.answers)
        .await?;
    let (attempt, _) = state.engine.load_attempt(&payload.attempt_id).await?;
    sync_session(&state, &attempt).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// Removes a result. Aggregates already folded from it are kept.
/// Admin only.
pub async fn delete_result(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ResultParams>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_admin()?;
    let id = require_id(params.id)?;
    store.delete(RESULTS, &id).await?;
    tracing::info!("Result {} deleted by {}", id, claims.user_id());
    Ok(StatusCode::NO_CONTENT)
}

/// Best result per user, ordered by score, then by time taken, then by who
/// finished first.
pub(crate) fn rank_best(mut results: Vec<ExamResult>, limit: usize) -> Vec<ExamResult> {
    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.time_taken_secs.cmp(&b.time_taken_secs))
            .then(a.completed_at.cmp(&b.completed_at))
    });
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.user_id.clone()))
        .take(limit)
        .collect()
}

/// `GET /api/results/leaderboard?quizId=&limit=`
pub async fn get_leaderboard(
    State(store): State<Arc<dyn DocumentStore>>,
    Query(params): Query<ResultParams>,
) -> Result<impl IntoResponse, AppError> {
    let quiz_id = params
        .quiz_id
        .ok_or_else(|| AppError::BadRequest("Missing 'quizId' query parameter".to_string()))?;

    let docs = store
        .query(&store::Query::collection(RESULTS).eq("quizId", quiz_id.as_str()))
        .await?;
    let results = docs
        .iter()
        .map(|d| d.decode::<ExamResult>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut board = Vec::new();
    for result in rank_best(results, page_size(params.limit, 10)) {
        let display_name = match store.get(USERS, &result.user_id).await? {
            Some(doc) => doc.decode::<User>()?.display_name,
            None => "Unknown".to_string(),
        };
        board.push(LeaderboardEntry {
            user_id: result.user_id,
            display_name,
            score: result.score,
            percentage: result.percentage,
            time_taken_secs: result.time_taken_secs,
            completed_at: result.completed_at,
        });
    }

    Ok(Json(board))
}

/// `GET /api/results/stream?quizId=`: server-sent snapshots of a quiz's
/// results, pushed whenever a result is written. Students only receive
/// their own.
pub async fn stream_results(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ResultParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let quiz_id = params
        .quiz_id
        .ok_or_else(|| AppError::BadRequest("Missing 'quizId' query parameter".to_string()))?;

    let mut query = store::Query::collection(RESULTS)
        .eq("quizId", quiz_id.as_str())
        .order_by("score", Direction::Desc)
        .limit(page_size(params.limit, 50));
    if !claims.is_staff() {
        query = query.eq("userId", claims.user_id());
    }

    tracing::debug!("User {} subscribed to results of quiz {}", claims.user_id(), quiz_id);
    let events = Subscription::new(store, query)
        .into_stream()
        .map(|snapshot| {
            let event = match snapshot {
                Ok(docs) => Event::default()
                    .event("results")
                    .json_data(to_json_list(&docs))
                    .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
                Err(e) => {
                    tracing::warn!("Result subscription failed: {}", e);
                    Event::default().event("error").data(e.to_string())
                }
            };
            Ok(event)
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn result(user: &str, score: i64, secs: i64, at: i64) -> ExamResult {
        ExamResult {
            id: format!("{}-{}", user, at),
            attempt_id: format!("{}-{}", user, at),
            quiz_id: "quiz".into(),
            user_id: user.into(),
            quiz_title: "Quiz".into(),
            score,
            max_score: 100,
            percentage: score as f64,
            correct_answers: 0,
            total_questions: 0,
            time_taken_secs: secs,
            passed: score >= 60,
            rank: 1,
            percentile: 0.0,
            completed_at: DateTime::<Utc>::from_timestamp(at, 0).unwrap(),
            question_review: vec![],
            created_at: None,
        }
    }

    #[test]
    fn leaderboard_keeps_best_per_user() {
        let board = rank_best(
            vec![
                result("ann", 70, 300, 1),
                result("bob", 90, 500, 2),
                result("ann", 90, 400, 3),
                result("cid", 90, 400, 0),
            ],
            10,
        );
        let order: Vec<&str> = board.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["cid", "ann", "bob"]);
        assert_eq!(board[1].score, 90);
    }

    #[test]
    fn leaderboard_respects_limit() {
        let board = rank_best((0..5).map(|i| result(&format!("u{}", i), i, 0, i)).collect(), 2);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, "u4");
    }
}
