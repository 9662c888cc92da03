// tests/exam_flow_tests.rs

mod common;

use common::{PASSWORD, TestApp, spawn_app};
use serde_json::{Map, Value, json};

/// Takes a student from the dashboard into a running exam.
async fn enter_exam(app: &TestApp, student: &str, quiz_id: &str) -> Value {
    let selected: Value = app
        .post("/api/exam/select", student, json!({ "quizId": quiz_id }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(selected["state"], "rules_instructions");

    let acknowledged: Value = app
        .post("/api/exam/acknowledge", student, json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(acknowledged["state"], "password_verification");

    let response = app
        .post("/api/exam/verify", student, json!({ "password": PASSWORD }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn full_exam_flow_scores_the_submission() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, _) = app.register("student").await;
    let (quiz_id, question_ids) = app.seed_quiz(&teacher, 20, 4).await;

    // 15 right, 5 wrong
    let answers: Map<String, Value> = question_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), json!(if i < 15 { 0 } else { 1 })))
        .collect();

    // Act
    let exam = enter_exam(&app, &student, &quiz_id).await;
    let saved = app
        .client
        .put(app.url("/api/exam/answers"))
        .bearer_auth(&student)
        .json(&json!({ "answers": { question_ids[0].as_str(): 0 } }))
        .send()
        .await
        .unwrap();
    let confirm: Value = app
        .post("/api/exam/submit/request", &student, json!({}))
        .await
        .json()
        .await
        .unwrap();
    let submitted = app
        .post(
            "/api/exam/submit",
            &student,
            json!({ "password": PASSWORD, "answers": answers }),
        )
        .await;

    // Assert
    assert_eq!(exam["state"], "exam_interface");
    assert_eq!(exam["redirect"], false);
    assert_eq!(exam["questions"].as_array().unwrap().len(), 20);
    assert!(exam["questions"][0].get("correctOption").is_none());
    assert_eq!(saved.status().as_u16(), 200);
    assert_eq!(confirm["state"], "submit_confirmation");

    assert_eq!(submitted.status().as_u16(), 200);
    let body: Value = submitted.json().await.unwrap();
    assert_eq!(body["state"], "results_review");
    assert_eq!(body["result"]["score"], 60);
    assert_eq!(body["result"]["maxScore"], 80);
    assert_eq!(body["result"]["correctAnswers"], 15);
    assert_eq!(body["result"]["percentage"], 75.0);
    assert_eq!(body["result"]["passed"], true);
    assert_eq!(body["result"]["rank"], 1);
}

#[tokio::test]
async fn submitted_exam_cannot_be_reentered_or_resubmitted() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, _) = app.register("student").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 3, 1).await;
    enter_exam(&app, &student, &quiz_id).await;
    app.post("/api/exam/submit/request", &student, json!({})).await;
    let body: Value = app
        .post("/api/exam/submit", &student, json!({ "password": PASSWORD }))
        .await
        .json()
        .await
        .unwrap();
    let result_id = body["context"]["resultId"].as_str().unwrap().to_string();

    // Act
    let reentry: Value = app
        .post("/api/exam/navigate", &student, json!({ "to": "exam_interface" }))
        .await
        .json()
        .await
        .unwrap();
    let resubmit: Value = app
        .post("/api/exam/submit", &student, json!({ "password": PASSWORD }))
        .await
        .json()
        .await
        .unwrap();
    let plain_resubmit = app
        .post(
            &format!("/api/attempts/submit?id={}", result_id),
            &student,
            json!({ "answers": {} }),
        )
        .await;
    let finished: Value = app
        .post("/api/exam/finish", &student, json!({}))
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(reentry["redirect"], true);
    assert_eq!(reentry["state"], "results_review");
    assert_eq!(reentry["advisory"]["code"], "already_submitted");
    assert_eq!(resubmit["state"], "results_review");
    assert_eq!(resubmit["advisory"]["code"], "already_submitted");
    assert_eq!(plain_resubmit.status().as_u16(), 403);
    assert_eq!(finished["state"], "dashboard");
    assert_eq!(finished["route"], "/student-dashboard");
}

#[tokio::test]
async fn students_cannot_go_around_the_exam_guard() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, _) = app.register("student").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 2, 1).await;
    app.get("/api/exam/session", &student).await;

    // Act
    let started = app
        .post("/api/attempts", &student, json!({ "quizId": quiz_id }))
        .await;
    let submitted = app
        .post("/api/attempts/submit?id=anything", &student, json!({ "answers": {} }))
        .await;
    let result = app
        .post("/api/results", &student, json!({ "attemptId": "anything" }))
        .await;
    let session: Value = app
        .get("/api/exam/session", &student)
        .await
        .json()
        .await
        .unwrap();
    let attempts: Value = app.get("/api/attempts", &student).await.json().await.unwrap();

    // Assert
    assert_eq!(started.status().as_u16(), 403);
    assert_eq!(submitted.status().as_u16(), 403);
    assert_eq!(result.status().as_u16(), 403);
    assert_eq!(session["state"], "dashboard");
    assert_eq!(session["context"]["fromRules"], false);
    assert!(attempts.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn staff_attempts_do_not_open_the_exam_screen() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 2, 1).await;
    app.get("/api/exam/session", &teacher).await;

    // Act
    let started = app
        .post("/api/attempts", &teacher, json!({ "quizId": quiz_id }))
        .await;
    let session: Value = app
        .get("/api/exam/session", &teacher)
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(started.status().as_u16(), 201);
    let attempt: Value = started.json().await.unwrap();
    assert_eq!(attempt["verified"], false);
    assert_eq!(session["state"], "dashboard");
    assert_eq!(session["context"]["fromRules"], false);
    assert!(session["context"]["currentAttemptId"].is_null());
}

#[tokio::test]
async fn exam_flow_attempts_refuse_plain_submission() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, _) = app.register("student").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 2, 1).await;
    let exam = enter_exam(&app, &student, &quiz_id).await;
    let attempt_id = exam["context"]["currentAttemptId"].as_str().unwrap().to_string();

    // Act
    let response = app
        .post(
            &format!("/api/attempts/submit?id={}", attempt_id),
            &teacher,
            json!({ "answers": {} }),
        )
        .await;
    let attempt: Value = app
        .get(&format!("/api/attempts?id={}", attempt_id), &student)
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 403);
    assert_eq!(attempt["status"], "in_progress");
    assert_eq!(attempt["verified"], true);
}

#[tokio::test]
async fn exam_screens_redirect_without_an_attempt() {
    // Arrange
    let app = spawn_app().await;
    let (student, _) = app.register("student").await;

    // Act
    let take: Value = app
        .post("/api/exam/navigate", &student, json!({ "to": "exam_interface" }))
        .await
        .json()
        .await
        .unwrap();
    let verify: Value = app
        .post("/api/exam/navigate", &student, json!({ "to": "password_verification" }))
        .await
        .json()
        .await
        .unwrap();
    let acknowledge: Value = app
        .post("/api/exam/acknowledge", &student, json!({}))
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(take["redirect"], true);
    assert_eq!(take["state"], "dashboard");
    assert_eq!(take["advisory"]["code"], "no_active_attempt");
    assert_eq!(verify["redirect"], true);
    assert_eq!(verify["state"], "rules_instructions");
    assert_eq!(acknowledge["redirect"], true);
    assert_eq!(acknowledge["advisory"]["code"], "select_quiz_first");
}

#[tokio::test]
async fn missing_quiz_cannot_be_selected() {
    // Arrange
    let app = spawn_app().await;
    let (student, _) = app.register("student").await;

    // Act
    let body: Value = app
        .post("/api/exam/select", &student, json!({ "quizId": "no-such-quiz" }))
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(body["redirect"], true);
    assert_eq!(body["state"], "dashboard");
    assert_eq!(body["advisory"]["code"], "quiz_unavailable");
}

#[tokio::test]
async fn leaving_needs_confirmation_and_abandons_the_attempt() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, _) = app.register("student").await;
    let (quiz_id, _) = app.seed_quiz(&teacher, 2, 1).await;
    let exam = enter_exam(&app, &student, &quiz_id).await;
    let attempt_id = exam["context"]["currentAttemptId"].as_str().unwrap().to_string();

    // Act
    let unconfirmed: Value = app
        .post("/api/exam/leave", &student, json!({}))
        .await
        .json()
        .await
        .unwrap();
    let confirmed: Value = app
        .post("/api/exam/leave", &student, json!({ "confirm": true }))
        .await
        .json()
        .await
        .unwrap();
    let attempt: Value = app
        .get(&format!("/api/attempts?id={}", attempt_id), &student)
        .await
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(unconfirmed["state"], "exam_interface");
    assert_eq!(unconfirmed["advisory"]["code"], "confirm_leave");
    assert_eq!(confirmed["state"], "dashboard");
    assert_eq!(confirmed["advisory"]["code"], "attempt_abandoned");
    assert_eq!(attempt["status"], "abandoned");
}

#[tokio::test]
async fn repeated_reauthentication_failures_are_throttled() {
    // Arrange
    let app = spawn_app().await;
    let (student, _) = app.register("student").await;
    let wrong = json!({ "password": "not-my-password" });

    // Act
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = app.post("/api/auth/reauthenticate", &student, wrong.clone()).await;
        statuses.push(response.status().as_u16());
    }
    let throttled = app
        .post("/api/auth/reauthenticate", &student, json!({ "password": PASSWORD }))
        .await;

    // Assert
    assert_eq!(statuses, vec![401, 401, 401]);
    assert_eq!(throttled.status().as_u16(), 429);
    assert!(throttled.headers().get("retry-after").is_some());
    let body: Value = throttled.json().await.unwrap();
    let wait = body["retryAfterSecs"].as_i64().unwrap();
    assert!((1..=15).contains(&wait));
}

#[tokio::test]
async fn exam_lock_reset_is_admin_only() {
    // Arrange
    let app = spawn_app().await;
    let (student, student_id) = app.register("student").await;

    // Act
    let response = app
        .post(
            &format!("/api/admin/exam-lock/reset?userId={}", student_id),
            &student,
            json!({}),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn leaderboard_lists_best_scores() {
    // Arrange
    let app = spawn_app().await;
    let (teacher, _) = app.register("teacher").await;
    let (student, student_id) = app.register("student").await;
    let (quiz_id, question_ids) = app.seed_quiz(&teacher, 2, 5).await;
    enter_exam(&app, &student, &quiz_id).await;
    app.post("/api/exam/submit/request", &student, json!({})).await;
    app.post(
        "/api/exam/submit",
        &student,
        json!({ "password": PASSWORD, "answers": { question_ids[0].as_str(): 0 } }),
    )
    .await;

    // Act
    let board: Value = app
        .get(&format!("/api/results/leaderboard?quizId={}", quiz_id), &teacher)
        .await
        .json()
        .await
        .unwrap();

    // Assert
    let entries = board.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["userId"], student_id.as_str());
    assert_eq!(entries[0]["score"], 5);
    assert_eq!(entries[0]["displayName"], "Test student");
}
