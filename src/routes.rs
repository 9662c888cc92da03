// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, ai, attempts, auth, exam, navigation, questions, quizzes, results, users},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, users, quizzes, attempts, results, ai,
///   exam, navigation, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects the shared `AppState`.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_layer = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(
            Router::new()
                .route("/reauthenticate", post(auth::reauthenticate))
                .layer(auth_layer.clone()),
        );

    let user_routes = Router::new()
        .route(
            "/",
            get(users::get_users)
                .post(users::create_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/stats", get(users::get_user_stats))
        .route("/activity", get(users::get_activity))
        .layer(auth_layer.clone());

    let quiz_routes = Router::new()
        .route(
            "/",
            get(quizzes::get_quizzes)
                .post(quizzes::create_quiz)
                .put(quizzes::update_quiz)
                .delete(quizzes::delete_quiz),
        )
        .route(
            "/questions",
            get(questions::get_questions)
                .post(questions::create_question)
                .put(questions::update_question)
                .delete(questions::delete_question),
        )
        .layer(auth_layer.clone());

    let attempt_routes = Router::new()
        .route(
            "/",
            get(attempts::get_attempts)
                .post(attempts::create_attempt)
                .put(attempts::update_attempt)
                .delete(attempts::delete_attempt),
        )
        .route("/submit", post(attempts::submit_attempt))
        .route("/abandon", post(attempts::abandon_attempt))
        .layer(auth_layer.clone());

    let result_routes = Router::new()
        .route(
            "/",
            get(results::get_results)
                .post(results::create_result)
                .delete(results::delete_result),
        )
        .route("/leaderboard", get(results::get_leaderboard))
        .route("/stream", get(results::stream_results))
        .layer(auth_layer.clone());

    let ai_routes = Router::new()
        .route(
            "/",
            get(ai::get_ai_content)
                .post(ai::create_ai_content)
                .put(ai::update_ai_content)
                .delete(ai::delete_ai_content),
        )
        .layer(auth_layer.clone());

    let exam_routes = Router::new()
        .route("/session", get(exam::get_session))
        .route("/select", post(exam::select))
        .route("/acknowledge", post(exam::acknowledge))
        .route("/verify", post(exam::verify))
        .route("/navigate", post(exam::navigate))
        .route("/answers", put(exam::save_answers))
        .route("/leave", post(exam::leave))
        .route("/submit/request", post(exam::request_submit))
        .route("/submit/cancel", post(exam::cancel_submit))
        .route("/submit", post(exam::submit))
        .route("/finish", post(exam::finish))
        .layer(auth_layer.clone());

    // Anonymous callers are resolved too, so no auth layer here.
    let navigation_routes = Router::new().route("/resolve", get(navigation::resolve));

    let admin_routes = Router::new()
        .route("/exam-lock/reset", post(admin::reset_exam_lock))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(auth_layer);

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/results", result_routes)
        .nest("/api/ai", ai_routes)
        .nest("/api/exam", exam_routes)
        .nest("/api/navigation", navigation_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
