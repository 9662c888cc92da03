// src/handlers/exam.rs

//! Guarded exam flow.
//!
//! Each endpoint loads the caller's session, lets the guard validate the
//! transition and only then touches attempts. Illegal transitions come back
//! as `200` bodies with `redirect: true` and an advisory; only the
//! re-verification throttle (429) and lock (423) are error statuses.

use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    error::AppError,
    exam::{
        Advisory, ExamScreen, ExamSession, Redirect, SelectedQuiz, VerifyRefusal,
        guard::SessionContext, throttle::Gate,
    },
    models::{
        activity::ActivityAction,
        attempt::{AnswersRequest, Answers, Attempt, AttemptStatus},
        question::PublicQuestion,
        user::PasswordCheck,
    },
    state::AppState,
    store::{DocumentStore, RESULTS},
    utils::{activity, hash::check_user_password, jwt::Claims},
};

#[derive(Debug, Serialize)]
pub struct AdvisoryBody {
    pub code: Advisory,
    pub message: &'static str,
}

impl From<Advisory> for AdvisoryBody {
    fn from(code: Advisory) -> Self {
        AdvisoryBody {
            code,
            message: code.message(),
        }
    }
}

/// Body of every exam endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardResponse {
    pub state: ExamScreen,
    /// Client route of `state`.
    pub route: &'static str,
    pub redirect: bool,
    pub advisory: Option<AdvisoryBody>,
    pub context: SessionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<PublicQuestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectQuizRequest {
    pub quiz_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub to: ExamScreen,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaveRequest {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 128, message = "Password is required."))]
    pub password: String,
    #[serde(default)]
    pub answers: Answers,
}

pub(crate) fn wait_error(retry_after_secs: i64) -> AppError {
    AppError::TooManyRequests {
        message: format!(
            "Too many failed attempts. Try again in {} seconds.",
            retry_after_secs
        ),
        retry_after_secs,
    }
}

pub(crate) fn locked_error() -> AppError {
    AppError::Locked(Advisory::VerificationLocked.message().to_string())
}

/// Counts a rejected password against the session's throttle and returns
/// the error to send back.
pub(crate) async fn reject_password(
    store: &dyn DocumentStore,
    session: &mut ExamSession,
    now: DateTime<Utc>,
) -> AppError {
    let gate = session.record_failed_verification(now);
    let user_id = session.user_id().to_string();
    let failures = session.throttle().failures();

    tracing::warn!("Password re-verification failed for {} ({} in a row)", user_id, failures);
    activity::record(
        store,
        &user_id,
        ActivityAction::ReauthFailed,
        json!({ "failures": failures }),
    )
    .await;

    if gate == Gate::Locked {
        tracing::warn!("Exam flow locked for {}", user_id);
        activity::record(store, &user_id, ActivityAction::ReauthLocked, json!({})).await;
        return locked_error();
    }

    AppError::AuthError(format!(
        "Incorrect password. {} attempt(s) remaining.",
        session.throttle().remaining_tries()
    ))
}

async fn respond(
    state: &AppState,
    claims: &Claims,
    session: &ExamSession,
    redirected: bool,
    advisory: Option<Advisory>,
) -> Result<Json<GuardResponse>, AppError> {
    let screen = session.screen();
    let mut body = GuardResponse {
        state: screen,
        route: screen.route(claims.role),
        redirect: redirected,
        advisory: advisory.map(AdvisoryBody::from),
        context: session.context().clone(),
        attempt: None,
        questions: None,
        result: None,
    };

    match screen {
        ExamScreen::ExamInterface | ExamScreen::SubmitConfirmation => {
            if let Some(attempt_id) = session.current_attempt_id() {
                let (attempt, doc) = state.engine.load_attempt(attempt_id).await?;
                let questions = state.engine.load_questions(&attempt.quiz_id).await?;
                body.attempt = Some(doc.to_json());
                body.questions = Some(questions.into_iter().map(PublicQuestion::from).collect());
            }
        }
        ExamScreen::ResultsReview => {
            if let Some(result_id) = &session.context().result_id {
                body.result = state.store.get(RESULTS, result_id).await?.map(|d| d.to_json());
            }
        }
        _ => {}
    }

    Ok(Json(body))
}

async fn reply(
    state: &AppState,
    claims: &Claims,
    session: &ExamSession,
    outcome: Result<(), Redirect>,
) -> Result<Json<GuardResponse>, AppError> {
    match outcome {
        Ok(()) => respond(state, claims, session, false, None).await,
        Err(redirect) => respond(state, claims, session, true, Some(redirect.advisory)).await,
    }
}

async fn refusal_reply(
    state: &AppState,
    claims: &Claims,
    session: &ExamSession,
    refusal: VerifyRefusal,
) -> Result<Json<GuardResponse>, AppError> {
    match refusal {
        VerifyRefusal::Redirect(redirect) => reply(state, claims, session, Err(redirect)).await,
        VerifyRefusal::Wait { retry_after_secs } => Err(wait_error(retry_after_secs)),
        VerifyRefusal::Locked => Err(locked_error()),
    }
}

/// Brings the session in line with an attempt that was closed behind its
/// back (time limit, another tab). `None` when the attempt is still live.
async fn settle_closed_attempt(
    state: &AppState,
    session: &mut ExamSession,
    attempt_id: &str,
) -> Result<Option<Redirect>, AppError> {
    let (attempt, _) = state.engine.load_attempt(attempt_id).await?;
    let user_id = session.user_id().to_string();
    settle_with(state, session, attempt, &user_id).await
}

async fn settle_with(
    state: &AppState,
    session: &mut ExamSession,
    attempt: Attempt,
    user_id: &str,
) -> Result<Option<Redirect>, AppError> {
    match attempt.status {
        AttemptStatus::Completed => {
            session.complete(attempt.result_id.unwrap_or(attempt.id));
            Ok(Some(Redirect {
                to: ExamScreen::ResultsReview,
                advisory: Advisory::AlreadySubmitted,
            }))
        }
        AttemptStatus::Abandoned => {
            session.abandon();
            Ok(Some(Redirect {
                to: ExamScreen::Dashboard,
                advisory: Advisory::AttemptAbandoned,
            }))
        }
        AttemptStatus::InProgress if attempt.is_expired(Utc::now()) => {
            state.engine.abandon_attempt(&attempt.id, user_id).await?;
            session.abandon();
            Ok(Some(Redirect {
                to: ExamScreen::Dashboard,
                advisory: Advisory::AttemptAbandoned,
            }))
        }
        AttemptStatus::InProgress => Ok(None),
    }
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let session = shared.lock().await;
    reply(&state, &claims, &session, Ok(())).await
}

/// Dashboard → RulesInstructions.
pub async fn select(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SelectQuizRequest>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    let quiz = match state.engine.load_quiz(&payload.quiz_id).await {
        Ok((quiz, _)) => Some(quiz),
        Err(AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let outcome = match quiz.filter(|q| q.is_published && q.question_count > 0) {
        Some(quiz) => session.select_quiz(SelectedQuiz::from(&quiz)),
        None => Err(session.quiz_unavailable()),
    };
    reply(&state, &claims, &session, outcome).await
}

/// RulesInstructions → PasswordVerification.
pub async fn acknowledge(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let outcome = session.acknowledge_rules();
    reply(&state, &claims, &session, outcome).await
}

/// PasswordVerification → ExamInterface. Creates (or resumes) the attempt.
pub async fn verify(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PasswordCheck>,
) -> Result<Json<GuardResponse>, AppError> {
    payload.validate()?;

    let now = Utc::now();
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    if let Err(refusal) = session.check_entry_verification(now) {
        return refusal_reply(&state, &claims, &session, refusal).await;
    }

    if !check_user_password(state.store.as_ref(), claims.user_id(), &payload.password).await? {
        return Err(reject_password(state.store.as_ref(), &mut session, now).await);
    }

    let Some(quiz_id) = session.context().current_test.as_ref().map(|t| t.quiz_id.clone()) else {
        let redirect = session.quiz_unavailable();
        return reply(&state, &claims, &session, Err(redirect)).await;
    };

    match state.engine.start_verified_attempt(claims.user_id(), &quiz_id).await {
        Ok(attempt) => {
            session.enter_exam(attempt.id);
            reply(&state, &claims, &session, Ok(())).await
        }
        Err(AppError::NotFound(_)) | Err(AppError::BadRequest(_)) => {
            session.record_successful_verification();
            let redirect = session.quiz_unavailable();
            reply(&state, &claims, &session, Err(redirect)).await
        }
        Err(e) => Err(e),
    }
}

/// Direct navigation to a screen.
pub async fn navigate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NavigateRequest>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let outcome = session.navigate(payload.to).map(|_| ());
    reply(&state, &claims, &session, outcome).await
}

/// Autosaves answers of the running exam.
pub async fn save_answers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AnswersRequest>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    let active = session.exam_active();
    let Some(attempt_id) = session
        .current_attempt_id()
        .filter(|_| active)
        .map(str::to_string)
    else {
        let outcome = session.navigate(ExamScreen::ExamInterface).map(|_| ());
        return reply(&state, &claims, &session, outcome).await;
    };

    match state
        .engine
        .update_attempt(&attempt_id, claims.user_id(), payload.answers)
        .await
    {
        Ok(_) => reply(&state, &claims, &session, Ok(())).await,
        Err(AppError::Conflict(msg)) => match settle_closed_attempt(&state, &mut session, &attempt_id).await? {
            Some(redirect) => reply(&state, &claims, &session, Err(redirect)).await,
            None => Err(AppError::Conflict(msg)),
        },
        Err(e) => Err(e),
    }
}

/// Leaves the exam. Without `confirm: true` the user stays put; with it the
/// attempt is abandoned unscored.
pub async fn leave(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LeaveRequest>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    let attempt_id = match session.leave(payload.confirm) {
        Err(redirect) => return reply(&state, &claims, &session, Err(redirect)).await,
        Ok(None) => return reply(&state, &claims, &session, Ok(())).await,
        Ok(Some(attempt_id)) => attempt_id,
    };

    match state.engine.abandon_attempt(&attempt_id, claims.user_id()).await {
        Ok(_) | Err(AppError::NotFound(_)) => {
            session.abandon();
            tracing::info!("User {} left attempt {}", claims.user_id(), attempt_id);
            respond(&state, &claims, &session, false, Some(Advisory::AttemptAbandoned)).await
        }
        Err(AppError::Conflict(_)) => {
            let redirect = settle_closed_attempt(&state, &mut session, &attempt_id).await?;
            reply(&state, &claims, &session, redirect.map_or(Ok(()), Err)).await
        }
        Err(e) => Err(e),
    }
}

/// ExamInterface → SubmitConfirmation.
pub async fn request_submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let outcome = session.request_submit();
    reply(&state, &claims, &session, outcome).await
}

/// SubmitConfirmation → ExamInterface.
pub async fn cancel_submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let outcome = session.cancel_submit();
    reply(&state, &claims, &session, outcome).await
}

/// SubmitConfirmation → ResultsReview, after a second password check.
pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<GuardResponse>, AppError> {
    payload.validate()?;

    let now = Utc::now();
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    let attempt_id = match session.check_submit_verification(now) {
        Ok(id) => id,
        Err(refusal) => return refusal_reply(&state, &claims, &session, refusal).await,
    };

    if !check_user_password(state.store.as_ref(), claims.user_id(), &payload.password).await? {
        return Err(reject_password(state.store.as_ref(), &mut session, now).await);
    }

    match state
        .engine
        .submit_attempt(&attempt_id, claims.user_id(), payload.answers)
        .await
    {
        Ok(result) => {
            session.complete(result.id);
            reply(&state, &claims, &session, Ok(())).await
        }
        Err(AppError::BadRequest(msg)) => {
            // Time limit: the engine has already closed the attempt.
            session.abandon();
            Err(AppError::BadRequest(msg))
        }
        Err(AppError::Conflict(msg)) => {
            settle_closed_attempt(&state, &mut session, &attempt_id).await?;
            Err(AppError::Conflict(msg))
        }
        Err(e) => Err(e),
    }
}

/// ResultsReview → Dashboard.
pub async fn finish(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GuardResponse>, AppError> {
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let outcome = session.finish_review();
    reply(&state, &claims, &session, outcome).await
}

/// Keeps a user's session in step with attempt changes made outside the
/// guarded flow (the plain `/api/attempts` endpoints).
pub(crate) async fn sync_session(state: &AppState, attempt: &Attempt) -> Result<(), AppError> {
    let Some(shared) = state.sessions.existing(&attempt.user_id).await else {
        return Ok(());
    };
    let mut session = shared.lock().await;

    match attempt.status {
        AttemptStatus::InProgress => {
            if attempt.verified && !session.exam_active() && !session.throttle().is_locked() {
                let (quiz, _) = state.engine.load_quiz(&attempt.quiz_id).await?;
                session.resume(SelectedQuiz::from(&quiz), attempt.id.clone());
            }
        }
        _ if session.current_attempt_id() == Some(attempt.id.as_str()) => {
            let user_id = attempt.user_id.clone();
            settle_with(state, &mut session, attempt.clone(), &user_id).await?;
        }
        _ => {}
    }
    Ok(())
}
