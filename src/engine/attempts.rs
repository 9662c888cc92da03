// src/engine/attempts.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::scoring::{self, ScoreSummary, Standing};
use crate::{
    config::MAX_SUBMIT_RETRIES,
    error::AppError,
    models::{
        activity::ActivityAction,
        attempt::{Answers, Attempt, AttemptStatus},
        question::Question,
        quiz::{Quiz, QuizStats},
        result::ExamResult,
        stats::UserStats,
        user::{User, UserAggregate},
    },
    store::{
        ATTEMPTS, Direction, Document, DocumentStore, Precondition, Query, QUIZZES, RESULTS,
        StoreError, USER_STATS, USERS, WriteOp, new_id, questions_of, to_fields,
    },
    utils::activity,
};

/// Creates, mutates and finalizes attempts, and folds finished attempts into
/// results and aggregate statistics.
#[derive(Clone)]
pub struct AttemptEngine {
    store: Arc<dyn DocumentStore>,
    grace: Duration,
}

impl AttemptEngine {
    pub fn new(store: Arc<dyn DocumentStore>, grace_secs: i64) -> Self {
        Self {
            store,
            grace: Duration::seconds(grace_secs.max(0)),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn load_quiz(&self, quiz_id: &str) -> Result<(Quiz, Document), AppError> {
        let doc = self
            .store
            .get(QUIZZES, quiz_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quiz '{}' not found", quiz_id)))?;
        Ok((doc.decode()?, doc))
    }

    /// Questions of a quiz in display order.
    pub async fn load_questions(&self, quiz_id: &str) -> Result<Vec<Question>, AppError> {
        let docs = self
            .store
            .query(&Query::collection(questions_of(quiz_id)).order_by("position", Direction::Asc))
            .await?;
        docs.iter()
            .map(|d| d.decode::<Question>().map_err(AppError::from))
            .collect()
    }

    pub async fn load_attempt(&self, attempt_id: &str) -> Result<(Attempt, Document), AppError> {
        let doc = self
            .store
            .get(ATTEMPTS, attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Attempt '{}' not found", attempt_id)))?;
        Ok((doc.decode()?, doc))
    }

    /// Opens an attempt outside the guarded exam flow.
    pub async fn start_attempt(&self, user_id: &str, quiz_id: &str) -> Result<Attempt, AppError> {
        self.start_attempt_at(user_id, quiz_id, false, Utc::now()).await
    }

    /// Opens an attempt for a caller who has just passed the exam-entry
    /// password check.
    pub async fn start_verified_attempt(&self, user_id: &str, quiz_id: &str) -> Result<Attempt, AppError> {
        self.start_attempt_at(user_id, quiz_id, true, Utc::now()).await
    }

    /// Opens an attempt on a published quiz.
    ///
    /// A caller who already has a live attempt on the same quiz gets that
    /// attempt back instead of a second one. The new attempt is committed
    /// together with a write to the quiz guarded by its version, so question
    /// edits that read the quiz earlier fail instead of landing underneath a
    /// running attempt.
    pub async fn start_attempt_at(
        &self,
        user_id: &str,
        quiz_id: &str,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AppError> {
        for round in 0..MAX_SUBMIT_RETRIES {
            match self.try_start(user_id, quiz_id, verified, now).await? {
                Some(attempt) => return Ok(attempt),
                None => {
                    tracing::debug!(
                        "Start of {} on {} contended (round {}), retrying",
                        user_id,
                        quiz_id,
                        round + 1
                    );
                }
            }
        }
        Err(AppError::Conflict(
            "Quiz is being modified concurrently, try again".to_string(),
        ))
    }

    async fn try_start(
        &self,
        user_id: &str,
        quiz_id: &str,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, AppError> {
        let (quiz, quiz_doc) = self.load_quiz(quiz_id).await?;
        if !quiz.is_published {
            return Err(AppError::BadRequest(format!(
                "Quiz '{}' is not published",
                quiz.title
            )));
        }
        if quiz.question_count <= 0 {
            return Err(AppError::BadRequest(format!(
                "Quiz '{}' has no questions",
                quiz.title
            )));
        }

        if let Some(existing) = self.find_in_progress(user_id, Some(quiz_id), now).await? {
            tracing::info!("Resuming attempt {} for user {}", existing.id, user_id);
            if verified && !existing.verified {
                return self.mark_verified(existing).await;
            }
            return Ok(Some(existing));
        }

        let attempt = Attempt {
            id: new_id(),
            user_id: user_id.to_string(),
            quiz_id: quiz_id.to_string(),
            status: AttemptStatus::InProgress,
            answers: Answers::new(),
            started_at: now,
            last_updated_at: now,
            expires_at: now + Duration::minutes(quiz.duration_minutes) + self.grace,
            verified,
            score: None,
            max_score: None,
            correct_answers: None,
            total_questions: None,
            time_taken_secs: None,
            submitted_at: None,
            result_id: None,
            abandoned_at: None,
        };

        let ops = vec![
            WriteOp::create(ATTEMPTS, &attempt.id, to_fields(&attempt)?),
            WriteOp::update_at(
                QUIZZES,
                quiz_id,
                to_fields(&json!({ "lastAttemptAt": now }))?,
                quiz_doc.version,
            ),
        ];
        match self.store.commit(ops).await {
            Ok(_) => {}
            Err(e) if e.is_contention() => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        tracing::info!("User {} started attempt {} on quiz {}", user_id, attempt.id, quiz_id);
        activity::record(
            self.store.as_ref(),
            user_id,
            ActivityAction::QuizStarted,
            json!({ "quizId": quiz_id, "attemptId": attempt.id }),
        )
        .await;

        Ok(Some(attempt))
    }

    async fn mark_verified(&self, mut attempt: Attempt) -> Result<Option<Attempt>, AppError> {
        let (_, doc) = self.load_attempt(&attempt.id).await?;
        let patch = to_fields(&json!({ "verified": true }))?;
        match self
            .store
            .commit(vec![WriteOp::update_at(ATTEMPTS, &attempt.id, patch, doc.version)])
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_contention() => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        attempt.verified = true;
        Ok(Some(attempt))
    }

    /// The caller's live attempt, optionally restricted to one quiz. Expired
    /// attempts found on the way are closed as abandoned.
    pub async fn find_in_progress(
        &self,
        user_id: &str,
        quiz_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, AppError> {
        let mut query = Query::collection(ATTEMPTS)
            .eq("userId", user_id)
            .eq("status", AttemptStatus::InProgress.as_str());
        if let Some(quiz_id) = quiz_id {
            query = query.eq("quizId", quiz_id);
        }
        self.first_live(&query, now).await
    }

    /// The caller's live attempt opened through the exam flow.
    pub async fn find_verified_in_progress(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, AppError> {
        let query = Query::collection(ATTEMPTS)
            .eq("userId", user_id)
            .eq("status", AttemptStatus::InProgress.as_str())
            .eq("verified", true);
        self.first_live(&query, now).await
    }

    async fn first_live(&self, query: &Query, now: DateTime<Utc>) -> Result<Option<Attempt>, AppError> {
        for doc in self.store.query(query).await? {
            let attempt: Attempt = doc.decode()?;
            if attempt.is_expired(now) {
                if let Err(e) = self.close_abandoned(&attempt, doc.version, now).await {
                    tracing::warn!("Failed to close expired attempt {}: {:?}", attempt.id, e);
                }
                continue;
            }
            return Ok(Some(attempt));
        }
        Ok(None)
    }

    pub async fn update_attempt(
        &self,
        attempt_id: &str,
        user_id: &str,
        partial: Answers,
    ) -> Result<Attempt, AppError> {
        self.update_attempt_at(attempt_id, user_id, partial, Utc::now()).await
    }

    /// Merges autosaved answers into a live attempt the caller owns.
    pub async fn update_attempt_at(
        &self,
        attempt_id: &str,
        user_id: &str,
        partial: Answers,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AppError> {
        for _ in 0..MAX_SUBMIT_RETRIES {
            let (mut attempt, doc) = self.load_attempt(attempt_id).await?;
            ensure_owner(&attempt, user_id)?;
            ensure_in_progress(&attempt)?;
            if attempt.is_expired(now) {
                return Err(AppError::Conflict("Time limit exceeded".to_string()));
            }

            attempt.answers.extend(partial.clone());
            attempt.last_updated_at = now;

            let patch = to_fields(&json!({
                "answers": attempt.answers,
                "lastUpdatedAt": now,
            }))?;
            match self
                .store
                .commit(vec![WriteOp::update_at(ATTEMPTS, attempt_id, patch, doc.version)])
                .await
            {
                Ok(_) => return Ok(attempt),
                Err(e) if e.is_contention() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::Conflict(
            "Attempt is being modified concurrently, try again".to_string(),
        ))
    }

    pub async fn submit_attempt(
        &self,
        attempt_id: &str,
        user_id: &str,
        final_answers: Answers,
    ) -> Result<ExamResult, AppError> {
        self.submit_attempt_at(attempt_id, user_id, final_answers, Utc::now())
            .await
    }

    /// Finalizes an attempt.
    ///
    /// The attempt completion, the result and every aggregate are written in
    /// one atomic batch guarded by the versions read here. If anything moved
    /// in between (another submission on the same quiz, a second tab) the
    /// whole computation is redone against fresh data.
    pub async fn submit_attempt_at(
        &self,
        attempt_id: &str,
        user_id: &str,
        final_answers: Answers,
        now: DateTime<Utc>,
    ) -> Result<ExamResult, AppError> {
        for round in 0..MAX_SUBMIT_RETRIES {
            match self
                .try_submit(attempt_id, user_id, &final_answers, now)
                .await?
            {
                Some(result) => return Ok(result),
                None => {
                    tracing::debug!("Submission of {} contended (round {}), retrying", attempt_id, round + 1);
                }
            }
        }
        Err(AppError::Conflict(
            "Submission is contended, please retry".to_string(),
        ))
    }

    /// One read-compute-commit round. `Ok(None)` means a precondition failed
    /// and the round should be repeated.
    async fn try_submit(
        &self,
        attempt_id: &str,
        user_id: &str,
        final_answers: &Answers,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamResult>, AppError> {
        let (mut attempt, attempt_doc) = self.load_attempt(attempt_id).await?;
        ensure_owner(&attempt, user_id)?;
        match attempt.status {
            AttemptStatus::Completed => {
                return Err(AppError::Conflict("Attempt already submitted".to_string()));
            }
            AttemptStatus::Abandoned => {
                return Err(AppError::Conflict("Attempt was abandoned".to_string()));
            }
            AttemptStatus::InProgress => {}
        }
        if attempt.is_expired(now) {
            match self.close_abandoned(&attempt, attempt_doc.version, now).await {
                Ok(_) => {}
                Err(e) if e.is_contention() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            return Err(AppError::BadRequest(
                "Time limit exceeded; the attempt has been closed".to_string(),
            ));
        }

        attempt.answers.extend(final_answers.clone());

        let (quiz, quiz_doc) = self.load_quiz(&attempt.quiz_id).await?;
        let questions = self.load_questions(&attempt.quiz_id).await?;
        let summary = scoring::score_submission(&questions, &attempt.answers);

        let prior_scores: Vec<i64> = self
            .store
            .query(&Query::collection(RESULTS).eq("quizId", attempt.quiz_id.as_str()))
            .await?
            .iter()
            .filter_map(|d| d.field("score").and_then(|v| v.as_i64()))
            .collect();
        let standing = scoring::standing(&prior_scores, summary.score);

        let user_doc = self.store.get(USERS, &attempt.user_id).await?;
        let stats_doc = self.store.get(USER_STATS, &attempt.user_id).await?;

        let result = build_result(&attempt, &quiz, &summary, standing, now);
        let ops = self.submission_batch(
            &attempt,
            &attempt_doc,
            &quiz,
            &quiz_doc,
            &result,
            &summary,
            user_doc.as_ref(),
            stats_doc.as_ref(),
            now,
        )?;

        match self.store.commit(ops).await {
            Ok(_) => {}
            Err(e) if e.is_contention() => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Attempt {} submitted: {}/{} ({} of {} correct), rank {}",
            attempt_id,
            result.score,
            result.max_score,
            result.correct_answers,
            result.total_questions,
            result.rank
        );
        activity::record(
            self.store.as_ref(),
            &attempt.user_id,
            ActivityAction::QuizSubmitted,
            json!({ "quizId": attempt.quiz_id, "attemptId": attempt_id, "score": result.score }),
        )
        .await;

        Ok(Some(result))
    }

    #[allow(clippy::too_many_arguments)]
    fn submission_batch(
        &self,
        attempt: &Attempt,
        attempt_doc: &Document,
        quiz: &Quiz,
        quiz_doc: &Document,
        result: &ExamResult,
        summary: &ScoreSummary,
        user_doc: Option<&Document>,
        stats_doc: Option<&Document>,
        now: DateTime<Utc>,
    ) -> Result<Vec<WriteOp>, StoreError> {
        let mut ops = Vec::with_capacity(5);

        let completion = to_fields(&json!({
            "status": AttemptStatus::Completed,
            "answers": attempt.answers,
            "score": result.score,
            "maxScore": result.max_score,
            "correctAnswers": result.correct_answers,
            "totalQuestions": result.total_questions,
            "timeTakenSecs": result.time_taken_secs,
            "submittedAt": now,
            "lastUpdatedAt": now,
            "resultId": result.id,
        }))?;
        ops.push(WriteOp::update_at(ATTEMPTS, &attempt.id, completion, attempt_doc.version));

        // Keyed by attempt id: a second result for the same attempt can't exist.
        ops.push(WriteOp::create(RESULTS, &result.id, to_fields(result)?));

        let quiz_stats = fold_quiz_stats(&quiz.stats, result.score, result.passed);
        ops.push(WriteOp::update_at(
            QUIZZES,
            &quiz_doc.id,
            to_fields(&json!({ "stats": quiz_stats }))?,
            quiz_doc.version,
        ));

        if let Some(user_doc) = user_doc {
            let user: User = user_doc.decode()?;
            let aggregate = fold_user_aggregate(&user.stats, result.score, result.percentage);
            ops.push(WriteOp::update_at(
                USERS,
                &user_doc.id,
                to_fields(&json!({ "stats": aggregate, "lastActiveAt": now }))?,
                user_doc.version,
            ));
        }

        let (previous, precondition) = match stats_doc {
            Some(doc) => (doc.decode::<UserStats>()?, Precondition::Version(doc.version)),
            None => (UserStats::default(), Precondition::Missing),
        };
        let stats = fold_user_stats(previous, &attempt.user_id, result, summary, now);
        ops.push(WriteOp::upsert(
            USER_STATS,
            &attempt.user_id,
            to_fields(&stats)?,
            precondition,
        ));

        Ok(ops)
    }

    pub async fn abandon_attempt(&self, attempt_id: &str, user_id: &str) -> Result<Attempt, AppError> {
        let now = Utc::now();
        let (attempt, doc) = self.load_attempt(attempt_id).await?;
        ensure_owner(&attempt, user_id)?;
        match attempt.status {
            AttemptStatus::Abandoned => Ok(attempt),
            AttemptStatus::Completed => Err(AppError::Conflict(
                "Attempt already submitted".to_string(),
            )),
            AttemptStatus::InProgress => {
                let closed = self.close_abandoned(&attempt, doc.version, now).await?;
                activity::record(
                    self.store.as_ref(),
                    user_id,
                    ActivityAction::QuizAbandoned,
                    json!({ "quizId": attempt.quiz_id, "attemptId": attempt_id }),
                )
                .await;
                Ok(closed)
            }
        }
    }

    async fn close_abandoned(
        &self,
        attempt: &Attempt,
        version: i64,
        now: DateTime<Utc>,
    ) -> Result<Attempt, StoreError> {
        let patch = to_fields(&json!({
            "status": AttemptStatus::Abandoned,
            "abandonedAt": now,
            "lastUpdatedAt": now,
        }))?;
        self.store
            .commit(vec![WriteOp::update_at(ATTEMPTS, &attempt.id, patch, version)])
            .await?;
        tracing::info!("Attempt {} abandoned", attempt.id);

        let mut closed = attempt.clone();
        closed.status = AttemptStatus::Abandoned;
        closed.abandoned_at = Some(now);
        closed.last_updated_at = now;
        Ok(closed)
    }
}

fn ensure_owner(attempt: &Attempt, user_id: &str) -> Result<(), AppError> {
    if attempt.user_id != user_id {
        return Err(AppError::Forbidden(
            "Attempt belongs to another user".to_string(),
        ));
    }
    Ok(())
}

fn ensure_in_progress(attempt: &Attempt) -> Result<(), AppError> {
    if attempt.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Attempt is {}",
            attempt.status.as_str()
        )));
    }
    Ok(())
}

fn build_result(
    attempt: &Attempt,
    quiz: &Quiz,
    summary: &ScoreSummary,
    standing: Standing,
    now: DateTime<Utc>,
) -> ExamResult {
    let percentage = summary.percentage();
    ExamResult {
        id: attempt.id.clone(),
        attempt_id: attempt.id.clone(),
        quiz_id: attempt.quiz_id.clone(),
        user_id: attempt.user_id.clone(),
        quiz_title: quiz.title.clone(),
        score: summary.score,
        max_score: summary.max_score,
        percentage,
        correct_answers: summary.correct_answers,
        total_questions: summary.total_questions,
        time_taken_secs: (now - attempt.started_at).num_seconds().max(0),
        passed: percentage >= quiz.passing_percentage,
        rank: standing.rank,
        percentile: standing.percentile,
        completed_at: now,
        question_review: summary.review.clone(),
        created_at: None,
    }
}

fn fold_quiz_stats(stats: &QuizStats, score: i64, passed: bool) -> QuizStats {
    let total_attempts = stats.total_attempts + 1;
    let passed_attempts = stats.passed_attempts + i64::from(passed);
    QuizStats {
        total_attempts,
        passed_attempts,
        average_score: scoring::running_mean(stats.average_score, stats.total_attempts, score as f64),
        highest_score: if stats.total_attempts == 0 {
            score
        } else {
            stats.highest_score.max(score)
        },
        pass_rate: scoring::percentage(passed_attempts, total_attempts),
    }
}

fn fold_user_aggregate(stats: &UserAggregate, score: i64, percentage: f64) -> UserAggregate {
    UserAggregate {
        tests_taken: stats.tests_taken + 1,
        tests_created: stats.tests_created,
        average_score: scoring::running_mean(stats.average_score, stats.tests_taken, percentage),
        highest_score: stats.highest_score.max(percentage),
        total_score: stats.total_score + score,
    }
}

fn fold_user_stats(
    mut stats: UserStats,
    user_id: &str,
    result: &ExamResult,
    summary: &ScoreSummary,
    now: DateTime<Utc>,
) -> UserStats {
    stats.average_percentage =
        scoring::running_mean(stats.average_percentage, stats.tests_taken, result.percentage);
    stats.user_id = user_id.to_string();
    stats.tests_taken += 1;
    stats.tests_passed += i64::from(result.passed);
    stats.total_correct += result.correct_answers as i64;
    stats.total_questions += result.total_questions as i64;
    stats.total_time_secs += result.time_taken_secs;
    stats.highest_percentage = stats.highest_percentage.max(result.percentage);
    for (category, tally) in &summary.by_category {
        let entry = stats.category_breakdown.entry(category.clone()).or_default();
        entry.correct += tally.correct;
        entry.total += tally.total;
    }
    stats.last_attempt_at = Some(now);
    stats
}
