// src/handlers/users.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{auth::create_account, page_size, require_id, to_json_list},
    models::{
        activity::ActivityParams,
        stats::UserStats,
        user::{CreateUserRequest, UpdateUserRequest, UserParams},
    },
    store::{self, ACTIVITY_LOGS, CREDENTIALS, Direction, DocumentStore, Precondition, USER_STATS, USERS, WriteOp},
    utils::jwt::Claims,
};

/// `GET /api/users`: one user by `?id=`, or the user list.
///
/// Users can read themselves; staff can read anyone; only admins list.
pub async fn get_users(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = params.id {
        claims.require_owner_or_staff(&id)?;
        let doc = store
            .get(USERS, &id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", id)))?;
        return Ok(Json(doc.to_json()));
    }

    claims.require_admin()?;
    let mut query = store::Query::collection(USERS).order_by("displayName", Direction::Asc);
    if let Some(role) = params.role {
        query = query.eq("role", role.as_str());
    }
    let docs = store.query(&query).await.map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}

/// Creates a user with any role.
/// Admin only.
pub async fn create_user(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_admin()?;
    payload.validate()?;

    let doc = create_account(
        store.as_ref(),
        &payload.display_name,
        &payload.email,
        &payload.password,
        payload.role,
    )
    .await?;

    tracing::info!("Admin {} created user {} ({})", claims.user_id(), doc.id, payload.role);
    Ok((StatusCode::CREATED, Json(doc.to_json())))
}

/// Updates a user.
///
/// A user may change their own display name; role and activation are
/// admin-only.
pub async fn update_user(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<UserParams>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    payload.validate()?;

    if claims.user_id() != id {
        claims.require_admin()?;
    }
    if (payload.role.is_some() || payload.is_active.is_some()) && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "Only admins can change roles or activation".to_string(),
        ));
    }

    let mut patch = Map::new();
    if let Some(name) = payload.display_name {
        patch.insert("displayName".into(), json!(name.trim()));
    }
    if let Some(role) = payload.role {
        patch.insert("role".into(), json!(role));
    }
    if let Some(active) = payload.is_active {
        patch.insert("isActive".into(), json!(active));
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let doc = store.update(USERS, &id, patch).await.map_err(|e| {
        tracing::error!("Failed to update user {}: {:?}", id, e);
        AppError::from(e)
    })?;

    Ok(Json(doc.to_json()))
}

/// Deactivates a user, or removes it with `hard=true`.
/// Admin only. Prevents deleting self.
pub async fn delete_user(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<UserParams>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_admin()?;
    let id = require_id(params.id)?;

    if id == claims.user_id() {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    if params.hard {
        store
            .commit(vec![
                WriteOp::delete(USERS, &id),
                WriteOp::Delete {
                    key: store::DocKey::new(CREDENTIALS, &id),
                    precondition: Precondition::Any,
                },
            ])
            .await?;
        tracing::info!("User {} removed by {}", id, claims.user_id());
    } else {
        store
            .update(USERS, &id, store::to_fields(&json!({ "isActive": false }))?)
            .await?;
        tracing::info!("User {} deactivated by {}", id, claims.user_id());
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub id: Option<String>,
}

/// `GET /api/users/stats`: analytics of one user, the caller by default.
pub async fn get_user_stats(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = params.id.unwrap_or_else(|| claims.user_id().to_string());
    claims.require_owner_or_staff(&id)?;

    let stats = match store.get(USER_STATS, &id).await? {
        Some(doc) => doc.decode::<UserStats>()?,
        None => UserStats {
            user_id: id,
            ..UserStats::default()
        },
    };

    let accuracy: Map<String, Value> = stats
        .category_breakdown
        .iter()
        .map(|(category, tally)| (category.clone(), json!(tally.accuracy())))
        .collect();

    Ok(Json(json!({ "stats": stats, "categoryAccuracy": accuracy })))
}

/// `GET /api/users/activity`: newest first.
pub async fn get_activity(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ActivityParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = params.user_id.unwrap_or_else(|| claims.user_id().to_string());
    claims.require_owner_or_staff(&user_id)?;

    let query = store::Query::collection(ACTIVITY_LOGS)
        .eq("userId", user_id.as_str())
        .order_by("at", Direction::Desc)
        .limit(page_size(params.limit, 50));
    let docs = store.query(&query).await?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}
