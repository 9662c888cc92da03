// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Default pass mark for quizzes that don't set one.
pub const DEFAULT_PASSING_PERCENTAGE: f64 = 60.0;

/// How many times a contended submission is recomputed before giving up.
pub const MAX_SUBMIT_RETRIES: usize = 3;

/// Upper bound on list endpoints.
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the in-memory store is used.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub allowed_origins: Vec<String>,
    pub port: u16,
    /// Seconds accepted past a quiz's duration before a submission is refused.
    pub exam_grace_secs: i64,
    /// Exam sessions untouched for this long are dropped from memory.
    pub session_idle_secs: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://127.0.0.1:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let exam_grace_secs = env::var("EXAM_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let session_idle_secs = env::var("SESSION_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1800);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            allowed_origins,
            port,
            exam_grace_secs,
            session_idle_secs,
        }
    }
}
