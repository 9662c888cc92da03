// tests/api_tests.rs

mod common;

use std::sync::Arc;

use aptilume::{routes, state::AppState, store::MemoryStore};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{PASSWORD, spawn_app, test_config};
use serde_json::{Value, json};
use tower::ServiceExt;

#[tokio::test]
async fn health_check_404() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .get(app.url("/random_path_that_does_not_exist"))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn login_returns_role_dashboard() {
    // Arrange
    let app = spawn_app().await;
    let email = format!("{}@example.com", &uuid::Uuid::new_v4().to_string()[..12]);
    app.client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "displayName": "Tina Teacher",
            "email": email,
            "password": PASSWORD,
            "role": "teacher",
        }))
        .send()
        .await
        .unwrap();

    // Act
    let response = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email.to_uppercase(), "password": PASSWORD }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["redirect"], "/teacher-dashboard");
    assert_eq!(body["type"], "Bearer");
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn login_with_wrong_password_is_401() {
    // Arrange
    let app = spawn_app().await;
    let email = format!("{}@example.com", &uuid::Uuid::new_v4().to_string()[..12]);
    app.client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "displayName": "Sam", "email": email, "password": PASSWORD }))
        .send()
        .await
        .unwrap();

    // Act
    let response = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": "not-the-password" }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn self_registering_as_admin_is_forbidden() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({
            "displayName": "Mallory",
            "email": "mallory@example.com",
            "password": PASSWORD,
            "role": "admin",
        }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app.client.get(app.url("/api/quizzes")).send().await.unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn router_rejects_forged_tokens() {
    // Arrange
    let app = routes::create_router(AppState::new(Arc::new(MemoryStore::new()), test_config()));
    let request = Request::builder()
        .uri("/api/exam/session")
        .header("Authorization", "Bearer not.a.token")
        .body(Body::empty())
        .unwrap();

    // Act
    let response = app.oneshot(request).await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_quiz_is_404() {
    // Arrange
    let app = spawn_app().await;
    let (token, _) = app.register("student").await;

    // Act
    let response = app.get("/api/quizzes?id=does-not-exist", &token).await;

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn created_quiz_can_be_read_back() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, teacher_id) = app.register("teacher").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 2, 1).await;

    // Act
    let response = app.get(&format!("/api/quizzes?id={}", quiz_id), &teacher).await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let quiz: Value = response.json().await.unwrap();
    assert_eq!(quiz["title"], "Quantitative Aptitude");
    assert_eq!(quiz["questionCount"], 2);
    assert_eq!(quiz["createdBy"], teacher_id.as_str());

    let listed: Value = app
        .get("/api/quizzes?companyTag=TCS", &teacher)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_without_id_is_400() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;

    // Act
    let response = app
        .client
        .put(app.url("/api/quizzes"))
        .bearer_auth(&teacher)
        .json(&json!({ "title": "Renamed" }))
        .send()
        .await
        .unwrap();
    let delete = app
        .client
        .delete(app.url("/api/quizzes"))
        .bearer_auth(&teacher)
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(delete.status().as_u16(), 400);
}

#[tokio::test]
async fn students_cannot_create_quizzes() {
    // Arrange
    let app = spawn_app().await;
    let (student, _) = app.register("student").await;

    // Act
    let response = app
        .post(
            "/api/quizzes",
            &student,
            json!({ "title": "Mine", "difficulty": "easy", "durationMinutes": 10 }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn store_outage_is_503() {
    // Arrange
    let app = spawn_app().await;
    let (token, _) = app.register("student").await;
    app.store.set_available(false);

    // Act
    let response = app.get("/api/quizzes", &token).await;

    // Assert
    assert_eq!(response.status().as_u16(), 503);
}

#[tokio::test]
async fn anonymous_navigation_goes_to_login() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .get(app.url("/api/navigation/resolve?path=/student-dashboard"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let decision: Value = response.json().await.unwrap();
    assert_eq!(decision["path"], "/login");
    assert_eq!(decision["redirected"], true);
}

#[tokio::test]
async fn wrong_dashboard_resolves_to_own() {
    // Arrange
    let app = spawn_app().await;
    let (student, _) = app.register("student").await;

    // Act
    let decision: Value = app
        .get("/api/navigation/resolve?path=/admin-dashboard", &student)
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(decision["path"], "/student-dashboard");
    assert_eq!(decision["redirected"], true);
}

#[tokio::test]
async fn user_stats_default_to_zero() {
    // Arrange
    let app = spawn_app().await;
    let (student, student_id) = app.register("student").await;

    // Act
    let response = app
        .get(&format!("/api/users/stats?id={}", student_id), &student)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stats"]["testsTaken"], 0);
}
