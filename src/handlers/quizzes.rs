// src/handlers/quizzes.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    config::{DEFAULT_PASSING_PERCENTAGE, MAX_SUBMIT_RETRIES},
    error::AppError,
    handlers::{require_id, to_json_list},
    models::{
        activity::ActivityAction,
        quiz::{CreateQuizRequest, Quiz, QuizParams, QuizStats, UpdateQuizRequest},
        user::User,
    },
    store::{
        self, Direction, Document, DocumentStore, FilterOp, QUIZZES, USERS, WriteOp, new_id,
        questions_of, to_fields,
    },
    utils::{
        activity,
        html::{clean_html, clean_opt},
        jwt::Claims,
    },
};

pub(crate) async fn load_quiz_doc(store: &dyn DocumentStore, id: &str) -> Result<Document, AppError> {
    store
        .get(QUIZZES, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz '{}' not found", id)))
}

/// Authors edit their own quizzes; admins edit any.
pub(crate) fn ensure_can_edit(claims: &Claims, quiz: &Document) -> Result<(), AppError> {
    claims.require_staff()?;
    let owner = quiz.field("createdBy").and_then(Value::as_str).unwrap_or_default();
    if claims.is_admin() || owner == claims.user_id() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Quiz belongs to another author".to_string()))
    }
}

fn visible_to(claims: &Claims, quiz: &Document) -> bool {
    claims.is_staff() || quiz.field("isPublished").and_then(Value::as_bool) == Some(true)
}

/// `GET /api/quizzes`: one quiz by `?id=`, or a filtered list.
///
/// Students only ever see published quizzes.
pub async fn get_quizzes(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuizParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = params.id {
        let doc = load_quiz_doc(store.as_ref(), &id).await?;
        if !visible_to(&claims, &doc) {
            return Err(AppError::NotFound(format!("Quiz '{}' not found", id)));
        }
        return Ok(Json(doc.to_json()));
    }

    let mut query = store::Query::collection(QUIZZES).order_by("title", Direction::Asc);
    if let Some(tag) = params.company_tag {
        query = query.filter("companyTags", FilterOp::ArrayContains, tag);
    }
    if let Some(difficulty) = params.difficulty {
        query = query.eq("difficulty", difficulty.as_str());
    }
    if let Some(recommended) = params.is_recommended {
        query = query.eq("isRecommended", recommended);
    }
    match (claims.is_staff(), params.is_published) {
        (false, _) => query = query.eq("isPublished", true),
        (true, Some(published)) => query = query.eq("isPublished", published),
        (true, None) => {}
    }

    let docs = store.query(&query).await.map_err(|e| {
        tracing::error!("Failed to list quizzes: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}

/// Creates a quiz and bumps the author's `testsCreated`.
/// Teacher or admin.
pub async fn create_quiz(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_staff()?;
    payload.validate()?;

    let quiz = Quiz {
        id: String::new(),
        title: clean_html(payload.title.trim()),
        description: clean_html(&payload.description),
        difficulty: payload.difficulty,
        duration_minutes: payload.duration_minutes,
        question_count: 0,
        tags: payload.tags,
        company_tags: payload.company_tags,
        is_published: payload.is_published,
        is_recommended: payload.is_recommended,
        passing_percentage: payload.passing_percentage.unwrap_or(DEFAULT_PASSING_PERCENTAGE),
        created_by: claims.user_id().to_string(),
        stats: QuizStats::default(),
        last_attempt_at: None,
        created_at: None,
        updated_at: None,
    };
    let fields = to_fields(&quiz)?;
    let id = new_id();

    for _ in 0..MAX_SUBMIT_RETRIES {
        let mut ops = vec![WriteOp::create(QUIZZES, &id, fields.clone())];
        if let Some(author) = store.get(USERS, claims.user_id()).await? {
            let mut stats = author.decode::<User>()?.stats;
            stats.tests_created += 1;
            ops.push(WriteOp::update_at(
                USERS,
                &author.id,
                to_fields(&json!({ "stats": stats }))?,
                author.version,
            ));
        }

        match store.commit(ops).await {
            Ok(written) => {
                let doc = written
                    .into_iter()
                    .find(|d| d.collection == QUIZZES)
                    .ok_or_else(|| AppError::InternalServerError("Quiz write returned nothing".to_string()))?;
                tracing::info!("Quiz {} created by {}", doc.id, claims.user_id());
                activity::record(
                    store.as_ref(),
                    claims.user_id(),
                    ActivityAction::QuizCreated,
                    json!({ "quizId": doc.id, "title": quiz.title }),
                )
                .await;
                return Ok((StatusCode::CREATED, Json(doc.to_json())));
            }
            Err(e) if e.is_contention() => continue,
            Err(e) => {
                tracing::error!("Failed to create quiz: {:?}", e);
                return Err(e.into());
            }
        }
    }

    Err(AppError::Conflict("Quiz creation is contended, please retry".to_string()))
}

/// Updates quiz fields. Only the fields present in the body change.
pub async fn update_quiz(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuizParams>,
    Json(mut payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    payload.validate()?;

    let existing = load_quiz_doc(store.as_ref(), &id).await?;
    ensure_can_edit(&claims, &existing)?;

    payload.title = clean_opt(payload.title.map(|t| t.trim().to_string()));
    payload.description = clean_opt(payload.description);

    let patch = to_fields(&payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let doc = store.update(QUIZZES, &id, patch).await.map_err(|e| {
        tracing::error!("Failed to update quiz {}: {:?}", id, e);
        AppError::from(e)
    })?;

    Ok(Json(doc.to_json()))
}

/// Deletes a quiz together with its questions.
pub async fn delete_quiz(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuizParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    let existing = load_quiz_doc(store.as_ref(), &id).await?;
    ensure_can_edit(&claims, &existing)?;

    let questions = store
        .query(&store::Query::collection(questions_of(&id)))
        .await?;
    let mut ops: Vec<WriteOp> = questions
        .iter()
        .map(|q| WriteOp::delete(q.collection.as_str(), q.id.as_str()))
        .collect();
    ops.push(WriteOp::delete(QUIZZES, &id));

    store.commit(ops).await.map_err(|e| {
        tracing::error!("Failed to delete quiz {}: {:?}", id, e);
        AppError::from(e)
    })?;

    tracing::info!("Quiz {} deleted by {} ({} questions)", id, claims.user_id(), questions.len());
    Ok(StatusCode::NO_CONTENT)
}
