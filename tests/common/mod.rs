// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;

use aptilume::{
    config::Config,
    routes,
    state::AppState,
    store::{DocumentStore, MemoryStore},
};
use serde_json::{Value, json};

pub const PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub address: String,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        admin_email: None,
        admin_password: None,
        allowed_origins: vec!["http://localhost:5173".to_string()],
        port: 0,
        exam_grace_secs: 60,
        session_idle_secs: 1800,
    }
}

/// Helper function to spawn the app on a random port for testing.
/// The in-memory store is returned so tests can take it offline.
pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());

    let shared: Arc<dyn DocumentStore> = store.clone();
    let app = routes::create_router(AppState::new(shared, test_config()));

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        store,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Registers a fresh account and returns `(token, user id)`.
    pub async fn register(&self, role: &str) -> (String, String) {
        let email = format!("{}@example.com", &uuid::Uuid::new_v4().to_string()[..12]);
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "displayName": format!("Test {}", role),
                "email": email,
                "password": PASSWORD,
                "role": role,
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);

        let body: Value = response.json().await.unwrap();
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Creates a published quiz with `count` four-option questions worth
    /// `marks` each; option 0 is always correct. Returns `(quiz id, question ids)`.
    pub async fn seed_quiz(&self, token: &str, count: usize, marks: i64) -> (String, Vec<String>) {
        let quiz: Value = self
            .client
            .post(self.url("/api/quizzes"))
            .bearer_auth(token)
            .json(&json!({
                "title": "Quantitative Aptitude",
                "description": "Numbers and ratios",
                "difficulty": "medium",
                "durationMinutes": 30,
                "companyTags": ["TCS"],
                "isPublished": true,
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let quiz_id = quiz["id"].as_str().unwrap().to_string();

        let mut question_ids = Vec::with_capacity(count);
        for i in 0..count {
            let response = self
                .client
                .post(self.url(&format!("/api/quizzes/questions?quizId={}", quiz_id)))
                .bearer_auth(token)
                .json(&json!({
                    "text": format!("Question {}", i + 1),
                    "options": ["right", "wrong", "also wrong", "still wrong"],
                    "correctOption": 0,
                    "marks": marks,
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status().as_u16(), 201);
            let question: Value = response.json().await.unwrap();
            question_ids.push(question["id"].as_str().unwrap().to_string());
        }

        (quiz_id, question_ids)
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }
}
