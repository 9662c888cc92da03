// src/exam/session.rs

use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::guard::{ExamSession, SelectedQuiz};
use crate::{engine::AttemptEngine, error::AppError, models::quiz::Quiz};

pub type SharedSession = Arc<Mutex<ExamSession>>;

impl From<&Quiz> for SelectedQuiz {
    fn from(quiz: &Quiz) -> Self {
        SelectedQuiz {
            quiz_id: quiz.id.clone(),
            title: quiz.title.clone(),
            duration_minutes: quiz.duration_minutes,
            question_count: quiz.question_count,
        }
    }
}

/// Exam sessions by user id. One session per user: every tab of the same
/// user shares it, so a second tab sees the exam the first one started.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user's session. A session created here is rebuilt around the
    /// user's live attempt if one opened through the exam flow is still
    /// running in the store.
    pub async fn session(&self, engine: &AttemptEngine, user_id: &str) -> Result<SharedSession, AppError> {
        if let Some(existing) = self.sessions.lock().await.get(user_id) {
            return Ok(existing.clone());
        }

        let mut session = ExamSession::new(user_id);
        if let Some(attempt) = engine.find_verified_in_progress(user_id, Utc::now()).await? {
            let (quiz, _) = engine.load_quiz(&attempt.quiz_id).await?;
            tracing::info!("Restoring exam session of {} around attempt {}", user_id, attempt.id);
            session.resume(SelectedQuiz::from(&quiz), attempt.id);
        }

        let mut sessions = self.sessions.lock().await;
        let shared = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(shared.clone())
    }

    /// The user's session if one was ever opened.
    pub async fn existing(&self, user_id: &str) -> Option<SharedSession> {
        self.sessions.lock().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drops sessions idle since `cutoff`. A session locked by a request in
    /// flight is kept. Returns how many were dropped.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, shared| match shared.try_lock() {
            Ok(session) => !session.is_idle_since(cutoff),
            Err(_) => true,
        });
        before - sessions.len()
    }

    /// Evicts sessions idle for longer than `idle_secs`, once a minute.
    pub fn spawn_reaper(&self, idle_secs: i64) {
        let registry = self.clone();
        let idle = Duration::seconds(idle_secs.max(0));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = registry.evict_idle(Utc::now() - idle).await;
                if evicted > 0 {
                    tracing::debug!("Evicted {} idle exam sessions", evicted);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exam::guard::ExamScreen,
        store::{DocumentStore, MemoryStore, QUIZZES, questions_of},
    };
    use serde_json::json;

    async fn seeded_engine() -> AttemptEngine {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let quiz = json!({
            "title": "Numerical Ability",
            "difficulty": "easy",
            "durationMinutes": 10,
            "questionCount": 1,
            "isPublished": true
        });
        store
            .create_with_id(QUIZZES, "quiz-1", quiz.as_object().cloned().unwrap())
            .await
            .unwrap();
        let question = json!({
            "text": "2 + 2 = ?",
            "options": ["3", "4"],
            "correctOption": 1,
            "position": 0
        });
        store
            .create_with_id(&questions_of("quiz-1"), "q1", question.as_object().cloned().unwrap())
            .await
            .unwrap();
        AttemptEngine::new(store, 60)
    }

    #[tokio::test]
    async fn new_session_starts_on_dashboard() {
        let engine = seeded_engine().await;
        let registry = SessionRegistry::new();
        let session = registry.session(&engine, "u1").await.unwrap();
        assert_eq!(session.lock().await.screen(), ExamScreen::Dashboard);
    }

    #[tokio::test]
    async fn same_user_gets_same_session() {
        let engine = seeded_engine().await;
        let registry = SessionRegistry::new();
        let a = registry.session(&engine, "u1").await.unwrap();
        let b = registry.session(&engine, "u1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let engine = seeded_engine().await;
        let registry = SessionRegistry::new();
        registry.session(&engine, "idle").await.unwrap();
        let failed = registry.session(&engine, "failed").await.unwrap();
        failed.lock().await.record_failed_verification(Utc::now());

        let evicted = registry.evict_idle(Utc::now() + Duration::seconds(1)).await;

        assert_eq!(evicted, 1);
        assert_eq!(registry.len().await, 1);
        assert!(registry.existing("idle").await.is_none());
        assert!(registry.existing("failed").await.is_some());
    }

    #[tokio::test]
    async fn recent_and_busy_sessions_survive_eviction() {
        let engine = seeded_engine().await;
        let registry = SessionRegistry::new();
        registry.session(&engine, "recent").await.unwrap();
        let busy = registry.session(&engine, "busy").await.unwrap();
        let _held = busy.lock().await;

        assert_eq!(registry.evict_idle(Utc::now() - Duration::minutes(30)).await, 0);
        assert_eq!(registry.evict_idle(Utc::now() + Duration::seconds(1)).await, 1);
        assert!(registry.existing("busy").await.is_some());
    }

    #[tokio::test]
    async fn session_ignores_attempts_opened_outside_the_exam_flow() {
        let engine = seeded_engine().await;
        engine.start_attempt("u1", "quiz-1").await.unwrap();

        let registry = SessionRegistry::new();
        let session = registry.session(&engine, "u1").await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.screen(), ExamScreen::Dashboard);
        assert!(!session.context().from_rules);
        assert_eq!(session.current_attempt_id(), None);
    }

    #[tokio::test]
    async fn session_is_rebuilt_around_live_attempt() {
        let engine = seeded_engine().await;
        let attempt = engine.start_verified_attempt("u1", "quiz-1").await.unwrap();

        let registry = SessionRegistry::new();
        let session = registry.session(&engine, "u1").await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.screen(), ExamScreen::ExamInterface);
        assert_eq!(session.current_attempt_id(), Some(attempt.id.as_str()));
        assert_eq!(
            session.context().current_test.as_ref().map(|q| q.quiz_id.as_str()),
            Some("quiz-1")
        );
    }
}
