// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde_json::json;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    exam::VerifyRefusal,
    handlers::exam::{locked_error, reject_password, wait_error},
    models::{
        activity::ActivityAction,
        user::{Credential, LoginRequest, PasswordCheck, RegisterRequest, Role, User, UserAggregate},
    },
    state::AppState,
    store::{CREDENTIALS, Document, DocumentStore, Query, USERS, WriteOp, new_id, to_fields},
    utils::{
        activity,
        hash::{check_user_password, hash_password, verify_password},
        jwt::{Claims, sign_jwt},
    },
};

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn find_user_by_email(
    store: &dyn DocumentStore,
    email: &str,
) -> Result<Option<Document>, AppError> {
    let docs = store
        .query(&Query::collection(USERS).eq("email", email).limit(1))
        .await?;
    Ok(docs.into_iter().next())
}

/// Creates the user document and its credential in one batch.
pub async fn create_account(
    store: &dyn DocumentStore,
    display_name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<Document, AppError> {
    let email = normalize_email(email);
    if find_user_by_email(store, &email).await?.is_some() {
        return Err(AppError::Conflict(format!("Email '{}' is already registered", email)));
    }

    let password_hash = hash_password(password)?;
    let now = Utc::now();
    let user = User {
        id: String::new(),
        display_name: display_name.trim().to_string(),
        email: email.clone(),
        role,
        is_active: true,
        stats: UserAggregate::default(),
        last_active_at: Some(now),
        created_at: None,
        updated_at: None,
    };
    let credential = Credential {
        email: email.clone(),
        password_hash,
    };

    let id = new_id();
    let written = store
        .commit(vec![
            WriteOp::create(USERS, &id, to_fields(&user)?),
            WriteOp::create(CREDENTIALS, &id, to_fields(&credential)?),
        ])
        .await
        .map_err(|e| {
            tracing::error!("Failed to create account {}: {:?}", email, e);
            AppError::from(e)
        })?;

    written
        .into_iter()
        .find(|doc| doc.collection == USERS)
        .ok_or_else(|| AppError::InternalServerError("User write returned nothing".to_string()))
}

/// Registers a new user.
///
/// Students by default; teachers may self-register, admins are created by
/// other admins only. Returns 201 with the user and a session token.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let role = payload.role.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(AppError::Forbidden(
            "Admin accounts can't be self-registered".to_string(),
        ));
    }

    let doc = create_account(
        state.store.as_ref(),
        &payload.display_name,
        &payload.email,
        &payload.password,
        role,
    )
    .await?;

    tracing::info!("Registered {} as {}", doc.id, role);
    activity::record(
        state.store.as_ref(),
        &doc.id,
        ActivityAction::Registered,
        json!({ "role": role }),
    )
    .await;

    let token = sign_jwt(&doc.id, role, &state.config.jwt_secret, state.config.jwt_expiration)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": token,
            "type": "Bearer",
            "user": doc.to_json(),
            "redirect": role.dashboard_route(),
        })),
    ))
}

/// Authenticates a user and returns a JWT token.
///
/// The response carries the dashboard route of the user's role.
pub async fn login(
    State(store): State<std::sync::Arc<dyn DocumentStore>>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let email = normalize_email(&payload.email);
    let doc = find_user_by_email(store.as_ref(), &email)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid email or password".to_string()))?;
    let user: User = doc.decode()?;

    let credential: Credential = store
        .get(CREDENTIALS, &doc.id)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid email or password".to_string()))?
        .decode()?;

    if !verify_password(&payload.password, &credential.password_hash)? {
        return Err(AppError::AuthError("Invalid email or password".to_string()));
    }

    if !user.is_active {
        return Err(AppError::Forbidden("Account is deactivated".to_string()));
    }

    let now = Utc::now();
    let refreshed = store
        .update(USERS, &doc.id, to_fields(&json!({ "lastActiveAt": now }))?)
        .await?;

    activity::record(store.as_ref(), &doc.id, ActivityAction::Login, json!({})).await;

    let token = sign_jwt(&doc.id, user.role, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "user": refreshed.to_json(),
        "redirect": user.role.dashboard_route(),
    })))
}

/// Re-verifies the signed-in user's password.
///
/// Shares the exam session's throttle: repeated failures are delayed (429)
/// and eventually locked (423).
pub async fn reauthenticate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PasswordCheck>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let now = Utc::now();
    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;

    match session.check_reauthentication(now) {
        Ok(()) => {}
        Err(VerifyRefusal::Wait { retry_after_secs }) => return Err(wait_error(retry_after_secs)),
        Err(VerifyRefusal::Locked) | Err(VerifyRefusal::Redirect(_)) => return Err(locked_error()),
    }

    if !check_user_password(state.store.as_ref(), claims.user_id(), &payload.password).await? {
        return Err(reject_password(state.store.as_ref(), &mut session, now).await);
    }

    session.record_successful_verification();
    Ok(Json(json!({ "verified": true })))
}
