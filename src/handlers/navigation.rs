// src/handlers/navigation.rs

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    exam::{ExamScreen, guard::{RouteDecision, resolve_route}},
    state::AppState,
    utils::jwt::optional_claims,
};

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub path: String,
}

/// `GET /api/navigation/resolve?path=`
///
/// Tells the client where a route really leads for the caller. Exam routes
/// go through the caller's exam session guard; everything else follows the
/// role rules.
pub async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ResolveParams>,
) -> Result<Json<RouteDecision>, AppError> {
    let claims = optional_claims(&headers, &state.config.jwt_secret);

    let (Some(claims), Some(target)) = (claims.as_ref(), ExamScreen::from_route(&params.path)) else {
        return Ok(Json(resolve_route(claims.map(|c| c.role), &params.path)));
    };

    let shared = state.sessions.session(&state.engine, claims.user_id()).await?;
    let mut session = shared.lock().await;
    let decision = match session.navigate(target) {
        Ok(screen) => RouteDecision {
            path: screen.route(claims.role).to_string(),
            redirected: false,
            advisory: None,
        },
        Err(redirect) => RouteDecision {
            path: redirect.to.route(claims.role).to_string(),
            redirected: true,
            advisory: Some(redirect.advisory),
        },
    };

    Ok(Json(decision))
}
