// src/models/user.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Platform role. Decides the landing dashboard and what a user may edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Route a freshly logged-in user lands on.
    pub fn dashboard_route(&self) -> &'static str {
        match self {
            Role::Student => "/student-dashboard",
            Role::Teacher => "/teacher-dashboard",
            Role::Admin => "/admin-dashboard",
        }
    }

    /// Teachers and admins author quiz content.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Denormalized counters kept on the user document for dashboard reads.
/// Scores here are percentages, since quizzes have different maximums.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAggregate {
    pub tests_taken: i64,
    pub tests_created: i64,
    pub average_score: f64,
    pub highest_score: f64,
    /// Sum of marks over every submitted test.
    pub total_score: i64,
}

/// Represents a document of the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,

    pub display_name: String,

    /// Unique, stored lowercased.
    pub email: String,

    pub role: Role,

    /// Deactivated users cannot log in.
    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub stats: UserAggregate,

    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Password hash, kept apart from the user document so it never leaves the
/// server with a user payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub email: String,
    pub password_hash: String,
}

/// DTO for self-registration.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(
        min = 2,
        max = 60,
        message = "Display name length must be between 2 and 60 characters."
    ))]
    pub display_name: String,
    #[validate(email(message = "A valid email is required."))]
    pub email: String,
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,
    /// Students by default; self-registration can't create admins.
    pub role: Option<Role>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for password re-verification.
#[derive(Debug, Deserialize, Validate)]
pub struct PasswordCheck {
    #[validate(length(min = 1, max = 128, message = "Password is required."))]
    pub password: String,
}

/// DTO for an admin creating a user with any role.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 60))]
    pub display_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    pub role: Role,
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 60))]
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Query parameters of `/api/users`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub id: Option<String>,
    pub role: Option<Role>,
    /// Admin-only: remove the document instead of deactivating it.
    #[serde(default)]
    pub hard: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboards_follow_role() {
        assert_eq!(Role::Admin.dashboard_route(), "/admin-dashboard");
        assert_eq!(Role::Teacher.dashboard_route(), "/teacher-dashboard");
        assert_eq!(Role::Student.dashboard_route(), "/student-dashboard");
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
