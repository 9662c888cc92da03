// src/handlers/questions.rs

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
    config::MAX_SUBMIT_RETRIES,
    error::AppError,
    handlers::{
        quizzes::{ensure_can_edit, load_quiz_doc},
        require_id,
    },
    models::question::{
        CreateQuestionRequest, PublicQuestion, Question, QuestionParams, UpdateQuestionRequest,
        default_marks,
    },
    store::{
        self, ATTEMPTS, Direction, Document, DocumentStore, QUIZZES, StoreError, WriteOp, new_id,
        questions_of, to_fields,
    },
    utils::{
        html::{clean_html, clean_opt},
        jwt::Claims,
    },
};

fn require_quiz_id(quiz_id: Option<String>) -> Result<String, AppError> {
    quiz_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'quizId' query parameter".to_string()))
}

/// Questions are frozen once anyone has attempted the quiz, so stored
/// attempts and results keep meaning what they meant.
async fn ensure_no_attempts(store: &dyn DocumentStore, quiz_id: &str) -> Result<(), AppError> {
    let attempts = store
        .query(&store::Query::collection(ATTEMPTS).eq("quizId", quiz_id).limit(1))
        .await?;
    if attempts.is_empty() {
        Ok(())
    } else {
        Err(AppError::Conflict(
            "Questions can't change once the quiz has attempts".to_string(),
        ))
    }
}

fn question_count(quiz: &Document) -> i64 {
    quiz.field("questionCount").and_then(Value::as_i64).unwrap_or(0)
}

/// A question write plus the matching `questionCount` change, guarded by the
/// quiz version read in `quiz`. Starting an attempt also writes the quiz, so
/// the batch fails if an attempt opened after `quiz` was read.
fn question_batch(quiz: &Document, question_op: WriteOp, delta: i64) -> Result<Vec<WriteOp>, StoreError> {
    let count = (question_count(quiz) + delta).max(0);
    Ok(vec![
        question_op,
        WriteOp::update_at(
            QUIZZES,
            &quiz.id,
            to_fields(&json!({ "questionCount": count }))?,
            quiz.version,
        ),
    ])
}

/// Applies a question write in one batch with the quiz, re-reading the quiz
/// on contention. With `frozen` the attempt check is repeated against every
/// quiz version read.
async fn commit_with_count(
    store: &dyn DocumentStore,
    quiz_id: &str,
    question_op: WriteOp,
    delta: i64,
    frozen: bool,
) -> Result<Vec<Document>, AppError> {
    for _ in 0..MAX_SUBMIT_RETRIES {
        let quiz = load_quiz_doc(store, quiz_id).await?;
        if frozen {
            ensure_no_attempts(store, quiz_id).await?;
        }
        match store.commit(question_batch(&quiz, question_op.clone(), delta)?).await {
            Ok(written) => return Ok(written),
            Err(e) if e.is_contention() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict("Quiz is being modified concurrently, try again".to_string()))
}

fn written_question(written: Vec<Document>) -> Result<Document, AppError> {
    written
        .into_iter()
        .find(|d| d.collection != QUIZZES)
        .ok_or_else(|| AppError::InternalServerError("Question write returned nothing".to_string()))
}

/// `GET /api/quizzes/questions?quizId=`: all questions in order, or one by
/// `&id=`. Students get questions without answers or explanations.
pub async fn get_questions(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuestionParams>,
) -> Result<impl IntoResponse, AppError> {
    let quiz_id = require_quiz_id(params.quiz_id)?;
    let quiz = load_quiz_doc(store.as_ref(), &quiz_id).await?;
    let published = quiz.field("isPublished").and_then(Value::as_bool) == Some(true);
    if !claims.is_staff() && !published {
        return Err(AppError::NotFound(format!("Quiz '{}' not found", quiz_id)));
    }

    if let Some(id) = params.id {
        let question: Question = store
            .get(&questions_of(&quiz_id), &id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question '{}' not found", id)))?
            .decode()?;
        return Ok(Json(render(&claims, question)?));
    }

    let docs = store
        .query(&store::Query::collection(questions_of(&quiz_id)).order_by("position", Direction::Asc))
        .await?;
    let questions = docs
        .iter()
        .map(|d| render(&claims, d.decode::<Question>()?))
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(Value::Array(questions)))
}

fn render(claims: &Claims, question: Question) -> Result<Value, AppError> {
    let value = if claims.is_staff() {
        serde_json::to_value(&question)?
    } else {
        serde_json::to_value(PublicQuestion::from(question))?
    };
    Ok(value)
}

/// Adds a question to a quiz.
/// Author of the quiz or admin.
pub async fn create_question(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuestionParams>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let quiz_id = require_quiz_id(params.quiz_id)?;
    payload.validate()?;

    let quiz = load_quiz_doc(store.as_ref(), &quiz_id).await?;
    ensure_can_edit(&claims, &quiz)?;

    let question = Question {
        id: String::new(),
        text: clean_html(&payload.text),
        options: payload.options.iter().map(|o| clean_html(o)).collect(),
        correct_option: payload.correct_option,
        explanation: clean_opt(payload.explanation),
        category: payload.category.map(|c| c.trim().to_string()),
        difficulty: payload.difficulty,
        marks: payload.marks.unwrap_or_else(default_marks),
        position: payload.position.unwrap_or_else(|| question_count(&quiz)),
        created_at: None,
        updated_at: None,
    };

    let op = WriteOp::create(questions_of(&quiz_id), new_id(), to_fields(&question)?);
    let doc = written_question(commit_with_count(store.as_ref(), &quiz_id, op, 1, false).await?)?;

    tracing::info!("Question {} added to quiz {}", doc.id, quiz_id);
    Ok((StatusCode::CREATED, Json(doc.to_json())))
}

/// Updates a question. Refused once the quiz has attempts.
pub async fn update_question(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuestionParams>,
    Json(mut payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let quiz_id = require_quiz_id(params.quiz_id)?;
    let id = require_id(params.id)?;
    payload.validate()?;

    let quiz = load_quiz_doc(store.as_ref(), &quiz_id).await?;
    ensure_can_edit(&claims, &quiz)?;
    ensure_no_attempts(store.as_ref(), &quiz_id).await?;

    let collection = questions_of(&quiz_id);
    let current: Question = store
        .get(&collection, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question '{}' not found", id)))?
        .decode()?;

    let option_count = payload.options.as_ref().map_or(current.options.len(), Vec::len);
    let correct = payload.correct_option.unwrap_or(current.correct_option);
    if correct >= option_count {
        return Err(AppError::BadRequest(
            "correctOption must index one of the options".to_string(),
        ));
    }

    payload.text = clean_opt(payload.text);
    payload.explanation = clean_opt(payload.explanation);
    payload.options = payload
        .options
        .map(|options| options.iter().map(|o| clean_html(o)).collect());

    let patch = to_fields(&payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let op = WriteOp::update(collection, id.as_str(), patch);
    let written = commit_with_count(store.as_ref(), &quiz_id, op, 0, true)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question {}: {:?}", id, e);
            e
        })?;
    let doc = written_question(written)?;

    Ok(Json(doc.to_json()))
}

/// Removes a question. Refused once the quiz has attempts.
pub async fn delete_question(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuestionParams>,
) -> Result<impl IntoResponse, AppError> {
    let quiz_id = require_quiz_id(params.quiz_id)?;
    let id = require_id(params.id)?;

    let quiz = load_quiz_doc(store.as_ref(), &quiz_id).await?;
    ensure_can_edit(&claims, &quiz)?;

    commit_with_count(
        store.as_ref(),
        &quiz_id,
        WriteOp::delete(questions_of(&quiz_id), id.as_str()),
        -1,
        true,
    )
    .await?;

    tracing::info!("Question {} removed from quiz {}", id, quiz_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::AttemptEngine, store::MemoryStore};

    async fn seeded_store() -> Arc<dyn DocumentStore> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let quiz = json!({
            "title": "Verbal Ability",
            "difficulty": "easy",
            "durationMinutes": 5,
            "questionCount": 1,
            "isPublished": true
        });
        store
            .create_with_id(QUIZZES, "quiz-1", quiz.as_object().cloned().unwrap())
            .await
            .unwrap();
        let question = json!({ "text": "Synonym of rapid?", "options": ["slow", "fast"], "correctOption": 1 });
        store
            .create_with_id(&questions_of("quiz-1"), "q1", question.as_object().cloned().unwrap())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn attempt_opened_after_the_check_invalidates_the_edit() {
        let store = seeded_store().await;
        let engine = AttemptEngine::new(store.clone(), 60);
        let quiz = load_quiz_doc(store.as_ref(), "quiz-1").await.unwrap();
        ensure_no_attempts(store.as_ref(), "quiz-1").await.unwrap();

        engine.start_attempt("u1", "quiz-1").await.unwrap();

        let ops = question_batch(&quiz, WriteOp::delete(questions_of("quiz-1"), "q1"), -1).unwrap();
        let err = store.commit(ops).await.unwrap_err();
        assert!(err.is_contention());
        assert!(store.get(&questions_of("quiz-1"), "q1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn questions_freeze_once_attempted() {
        let store = seeded_store().await;
        let engine = AttemptEngine::new(store.clone(), 60);
        engine.start_attempt("u1", "quiz-1").await.unwrap();

        let patch = json!({ "text": "Antonym of rapid?" }).as_object().cloned().unwrap();
        let update = commit_with_count(
            store.as_ref(),
            "quiz-1",
            WriteOp::update(questions_of("quiz-1"), "q1", patch),
            0,
            true,
        )
        .await
        .unwrap_err();

        assert!(matches!(update, AppError::Conflict(_)));
        let question = store.get(&questions_of("quiz-1"), "q1").await.unwrap().unwrap();
        assert_eq!(question.field("text"), Some(&json!("Synonym of rapid?")));
    }

    #[tokio::test]
    async fn delete_keeps_question_count_in_step() {
        let store = seeded_store().await;

        commit_with_count(
            store.as_ref(),
            "quiz-1",
            WriteOp::delete(questions_of("quiz-1"), "q1"),
            -1,
            true,
        )
        .await
        .unwrap();

        let quiz = load_quiz_doc(store.as_ref(), "quiz-1").await.unwrap();
        assert_eq!(question_count(&quiz), 0);
    }
}
