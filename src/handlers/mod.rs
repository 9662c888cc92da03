// src/handlers/mod.rs

pub mod admin;
pub mod ai;
pub mod attempts;
pub mod auth;
pub mod exam;
pub mod navigation;
pub mod questions;
pub mod quizzes;
pub mod results;
pub mod users;

use serde_json::Value;

use crate::{
    config::MAX_PAGE_SIZE, error::AppError, state::AppState, store::Document, utils::jwt::Claims,
};

/// `?id=` is mandatory on PUT and DELETE.
pub(crate) fn require_id(id: Option<String>) -> Result<String, AppError> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'id' query parameter".to_string()))
}

/// Students reach attempts only through the guarded exam flow.
pub(crate) fn refuse_students(claims: &Claims) -> Result<(), AppError> {
    if claims.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Students take quizzes through the exam flow".to_string(),
        ))
    }
}

/// Plain submission is for staff on attempts opened outside the exam flow.
pub(crate) async fn ensure_plain_submission(
    state: &AppState,
    claims: &Claims,
    attempt_id: &str,
) -> Result<(), AppError> {
    refuse_students(claims)?;
    let (attempt, _) = state.engine.load_attempt(attempt_id).await?;
    if attempt.verified {
        return Err(AppError::Forbidden(
            "Attempts opened through the exam flow are submitted through it".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn page_size(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

pub(crate) fn to_json_list(docs: &[Document]) -> Vec<Value> {
    docs.iter().map(Document::to_json).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_id_is_missing() {
        assert!(require_id(None).is_err());
        assert!(require_id(Some("  ".into())).is_err());
        assert_eq!(require_id(Some("abc".into())).unwrap(), "abc");
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(None, 10), 10);
        assert_eq!(page_size(Some(0), 10), 1);
        assert_eq!(page_size(Some(10_000), 10), MAX_PAGE_SIZE);
    }
}
