// src/handlers/ai.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{require_id, to_json_list},
    models::ai_content::{AiContent, AiContentParams, CreateAiContentRequest, UpdateAiContentRequest},
    store::{self, AI_CONTENT, Document, DocumentStore, to_fields},
    utils::{html::clean_html, jwt::Claims},
};

async fn load(store: &dyn DocumentStore, id: &str) -> Result<Document, AppError> {
    store
        .get(AI_CONTENT, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("AI content '{}' not found", id)))
}

fn ensure_author(claims: &Claims, doc: &Document) -> Result<(), AppError> {
    claims.require_staff()?;
    let author = doc.field("createdBy").and_then(Value::as_str).unwrap_or_default();
    if claims.is_admin() || author == claims.user_id() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Content belongs to another author".to_string()))
    }
}

pub async fn get_ai_content(
    State(store): State<Arc<dyn DocumentStore>>,
    Query(params): Query<AiContentParams>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(id) = params.id {
        return Ok(Json(load(store.as_ref(), &id).await?.to_json()));
    }

    let mut query = store::Query::collection(AI_CONTENT);
    if let Some(kind) = params.kind {
        query = query.eq("kind", kind);
    }
    if let Some(quiz_id) = params.quiz_id {
        query = query.eq("quizId", quiz_id);
    }
    let docs = store.query(&query).await?;

    Ok(Json(Value::Array(to_json_list(&docs))))
}

/// Stores generated content.
/// Teacher or admin.
pub async fn create_ai_content(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateAiContentRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require_staff()?;
    payload.validate()?;

    let content = AiContent {
        id: String::new(),
        kind: payload.kind.trim().to_string(),
        prompt: payload.prompt,
        content: clean_html(&payload.content),
        quiz_id: payload.quiz_id,
        created_by: claims.user_id().to_string(),
        created_at: None,
        updated_at: None,
    };

    let doc = store.create(AI_CONTENT, to_fields(&content)?).await.map_err(|e| {
        tracing::error!("Failed to store AI content: {:?}", e);
        AppError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(doc.to_json())))
}

pub async fn update_ai_content(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AiContentParams>,
    Json(mut payload): Json<UpdateAiContentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    payload.validate()?;
    ensure_author(&claims, &load(store.as_ref(), &id).await?)?;

    payload.content = payload.content.map(|c| clean_html(&c));
    let patch = to_fields(&payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let doc = store.update(AI_CONTENT, &id, patch).await?;
    Ok(Json(doc.to_json()))
}

pub async fn delete_ai_content(
    State(store): State<Arc<dyn DocumentStore>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<AiContentParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    ensure_author(&claims, &load(store.as_ref(), &id).await?)?;
    store.delete(AI_CONTENT, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
