// src/exam/guard.rs

//! Exam session state machine.
//!
//! Every screen of the exam flow is a state; every user action is a guarded
//! transition. An illegal transition never fails hard: the session moves to
//! the nearest legal upstream screen and the caller gets a [`Redirect`]
//! carrying an advisory to display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::throttle::{Gate, ReauthThrottle};
use crate::models::user::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamScreen {
    Dashboard,
    RulesInstructions,
    PasswordVerification,
    ExamInterface,
    SubmitConfirmation,
    ResultsReview,
    Unauthenticated,
    Blocked,
}

impl ExamScreen {
    /// Client route of the screen.
    pub fn route(&self, role: Role) -> &'static str {
        match self {
            ExamScreen::Dashboard => role.dashboard_route(),
            ExamScreen::RulesInstructions => "/exam/rules",
            ExamScreen::PasswordVerification => "/exam/verify",
            ExamScreen::ExamInterface => "/exam/take",
            ExamScreen::SubmitConfirmation => "/exam/submit",
            ExamScreen::ResultsReview => "/exam/results",
            ExamScreen::Unauthenticated => "/login",
            ExamScreen::Blocked => "/exam/blocked",
        }
    }

    /// Exam-flow screen addressed by a client route, if any.
    pub fn from_route(path: &str) -> Option<ExamScreen> {
        match path.trim_end_matches('/') {
            "/exam/rules" => Some(ExamScreen::RulesInstructions),
            "/exam/verify" => Some(ExamScreen::PasswordVerification),
            "/exam/take" => Some(ExamScreen::ExamInterface),
            "/exam/submit" => Some(ExamScreen::SubmitConfirmation),
            "/exam/results" => Some(ExamScreen::ResultsReview),
            "/exam/blocked" => Some(ExamScreen::Blocked),
            _ => None,
        }
    }
}

/// Quiz picked on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedQuiz {
    pub quiz_id: String,
    pub title: String,
    pub duration_minutes: i64,
    pub question_count: i64,
}

/// Typed session markers shared by the exam screens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub current_test: Option<SelectedQuiz>,
    pub from_rules: bool,
    pub exam_fullscreen_required: bool,
    pub current_attempt_id: Option<String>,
    /// Result under review once the attempt is submitted.
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    SelectQuizFirst,
    QuizUnavailable,
    AcknowledgeRulesFirst,
    NoActiveAttempt,
    ExamInProgress,
    ConfirmLeave,
    ConfirmSubmit,
    AlreadySubmitted,
    NotSubmitted,
    AttemptAbandoned,
    VerificationLocked,
    LoginRequired,
    WrongDashboard,
    NotNavigable,
}

impl Advisory {
    pub fn message(&self) -> &'static str {
        match self {
            Advisory::SelectQuizFirst => "Select a test from the dashboard first.",
            Advisory::QuizUnavailable => "That test is not available.",
            Advisory::AcknowledgeRulesFirst => "Please read and accept the test rules first.",
            Advisory::NoActiveAttempt => "No active test session. Start a test from the dashboard.",
            Advisory::ExamInProgress => "A test is in progress. Finish or leave it first.",
            Advisory::ConfirmLeave => {
                "Leaving now will end your test and it will not be scored. Confirm to leave."
            }
            Advisory::ConfirmSubmit => "Confirm your password to submit the test.",
            Advisory::AlreadySubmitted => "This test has already been submitted.",
            Advisory::NotSubmitted => "Results are available after the test is submitted.",
            Advisory::AttemptAbandoned => "Your test was ended without scoring.",
            Advisory::VerificationLocked => {
                "Too many failed password attempts. Contact support to continue."
            }
            Advisory::LoginRequired => "Please log in to continue.",
            Advisory::WrongDashboard => "You were redirected to your dashboard.",
            Advisory::NotNavigable => "That page can't be opened directly.",
        }
    }
}

/// Recovery applied after an illegal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub to: ExamScreen,
    pub advisory: Advisory,
}

/// Why a password check may not run right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyRefusal {
    Redirect(Redirect),
    Wait { retry_after_secs: i64 },
    Locked,
}

impl From<Redirect> for VerifyRefusal {
    fn from(r: Redirect) -> Self {
        VerifyRefusal::Redirect(r)
    }
}

/// One user's exam flow.
#[derive(Debug, Clone)]
pub struct ExamSession {
    user_id: String,
    screen: ExamScreen,
    context: SessionContext,
    throttle: ReauthThrottle,
    updated_at: DateTime<Utc>,
}

impl ExamSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            screen: ExamScreen::Dashboard,
            context: SessionContext::default(),
            throttle: ReauthThrottle::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn screen(&self) -> ExamScreen {
        self.screen
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn throttle(&self) -> &ReauthThrottle {
        &self.throttle
    }

    /// Nothing worth keeping in memory: no exam running, no failed
    /// verification on record and no screen change since `cutoff`.
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        !self.exam_active() && self.throttle.failures() == 0 && self.updated_at < cutoff
    }

    /// An attempt is open and not yet submitted.
    pub fn exam_active(&self) -> bool {
        self.context.current_attempt_id.is_some() && self.context.result_id.is_none()
    }

    pub fn current_attempt_id(&self) -> Option<&str> {
        self.context.current_attempt_id.as_deref()
    }

    fn exam_screen(&self) -> ExamScreen {
        if self.screen == ExamScreen::SubmitConfirmation {
            ExamScreen::SubmitConfirmation
        } else {
            ExamScreen::ExamInterface
        }
    }

    fn move_to(&mut self, screen: ExamScreen) {
        self.screen = screen;
        self.updated_at = Utc::now();
    }

    fn redirect(&mut self, to: ExamScreen, advisory: Advisory) -> Redirect {
        self.move_to(to);
        Redirect { to, advisory }
    }

    fn clear(&mut self) {
        self.context = SessionContext::default();
    }

    /// Refusal shared by every transition while an exam runs or the flow is
    /// locked.
    fn ensure_not_busy(&mut self) -> Result<(), Redirect> {
        if self.throttle.is_locked() {
            return Err(self.redirect(ExamScreen::Blocked, Advisory::VerificationLocked));
        }
        if self.exam_active() {
            let screen = self.exam_screen();
            return Err(self.redirect(screen, Advisory::ExamInProgress));
        }
        Ok(())
    }

    /// Validates a direct navigation to `target` and moves there, or to the
    /// nearest legal screen.
    pub fn navigate(&mut self, target: ExamScreen) -> Result<ExamScreen, Redirect> {
        if self.throttle.is_locked() {
            if target == ExamScreen::Dashboard && !self.exam_active() {
                self.clear();
                self.move_to(ExamScreen::Dashboard);
                return Ok(ExamScreen::Dashboard);
            }
            return Err(self.redirect(ExamScreen::Blocked, Advisory::VerificationLocked));
        }

        match target {
            ExamScreen::Dashboard => {
                if self.exam_active() {
                    let screen = self.exam_screen();
                    return Err(self.redirect(screen, Advisory::ConfirmLeave));
                }
                self.clear();
            }
            ExamScreen::RulesInstructions => {
                if self.exam_active() {
                    let screen = self.exam_screen();
                    return Err(self.redirect(screen, Advisory::ExamInProgress));
                }
                if self.context.result_id.is_some() {
                    return Err(self.redirect(ExamScreen::ResultsReview, Advisory::AlreadySubmitted));
                }
                if self.context.current_test.is_none() {
                    return Err(self.redirect(ExamScreen::Dashboard, Advisory::SelectQuizFirst));
                }
            }
            ExamScreen::PasswordVerification => {
                if self.exam_active() {
                    let screen = self.exam_screen();
                    return Err(self.redirect(screen, Advisory::ExamInProgress));
                }
                if !self.context.from_rules {
                    return Err(self.redirect(
                        ExamScreen::RulesInstructions,
                        Advisory::AcknowledgeRulesFirst,
                    ));
                }
            }
            ExamScreen::ExamInterface => {
                if self.context.result_id.is_some() {
                    return Err(self.redirect(ExamScreen::ResultsReview, Advisory::AlreadySubmitted));
                }
                if self.context.current_attempt_id.is_none() {
                    self.clear();
                    return Err(self.redirect(ExamScreen::Dashboard, Advisory::NoActiveAttempt));
                }
            }
            ExamScreen::SubmitConfirmation => {
                if !self.exam_active() {
                    self.clear();
                    return Err(self.redirect(ExamScreen::Dashboard, Advisory::NoActiveAttempt));
                }
            }
            ExamScreen::ResultsReview => {
                if self.context.result_id.is_none() {
                    if self.exam_active() {
                        let screen = self.exam_screen();
                        return Err(self.redirect(screen, Advisory::NotSubmitted));
                    }
                    return Err(self.redirect(ExamScreen::Dashboard, Advisory::NotSubmitted));
                }
            }
            ExamScreen::Unauthenticated | ExamScreen::Blocked => {
                let screen = self.screen;
                return Err(self.redirect(screen, Advisory::NotNavigable));
            }
        }

        self.move_to(target);
        Ok(target)
    }

    /// Dashboard → RulesInstructions with the chosen quiz.
    pub fn select_quiz(&mut self, quiz: SelectedQuiz) -> Result<(), Redirect> {
        self.ensure_not_busy()?;
        self.context = SessionContext {
            current_test: Some(quiz),
            ..SessionContext::default()
        };
        self.move_to(ExamScreen::RulesInstructions);
        Ok(())
    }

    /// Refuses a selection whose quiz is missing, unpublished or empty.
    pub fn quiz_unavailable(&mut self) -> Redirect {
        if let Err(busy) = self.ensure_not_busy() {
            return busy;
        }
        self.clear();
        self.redirect(ExamScreen::Dashboard, Advisory::QuizUnavailable)
    }

    /// RulesInstructions → PasswordVerification.
    pub fn acknowledge_rules(&mut self) -> Result<(), Redirect> {
        self.ensure_not_busy()?;
        if self.context.result_id.is_some() {
            return Err(self.redirect(ExamScreen::ResultsReview, Advisory::AlreadySubmitted));
        }
        if self.context.current_test.is_none() {
            return Err(self.redirect(ExamScreen::Dashboard, Advisory::SelectQuizFirst));
        }
        self.context.from_rules = true;
        self.context.exam_fullscreen_required = true;
        self.move_to(ExamScreen::PasswordVerification);
        Ok(())
    }

    /// May the password check guarding exam entry run now?
    pub fn check_entry_verification(&mut self, now: DateTime<Utc>) -> Result<(), VerifyRefusal> {
        self.ensure_not_busy()?;
        if !self.context.from_rules || self.context.current_test.is_none() {
            return Err(self
                .redirect(ExamScreen::RulesInstructions, Advisory::AcknowledgeRulesFirst)
                .into());
        }
        self.move_to(ExamScreen::PasswordVerification);
        self.gate(now)
    }

    /// May the password check confirming a submission run now? Returns the
    /// attempt to submit.
    pub fn check_submit_verification(&mut self, now: DateTime<Utc>) -> Result<String, VerifyRefusal> {
        if self.throttle.is_locked() {
            self.move_to(ExamScreen::Blocked);
            return Err(VerifyRefusal::Locked);
        }
        if self.context.result_id.is_some() {
            return Err(self
                .redirect(ExamScreen::ResultsReview, Advisory::AlreadySubmitted)
                .into());
        }
        let Some(attempt_id) = self.context.current_attempt_id.clone() else {
            self.clear();
            return Err(self
                .redirect(ExamScreen::Dashboard, Advisory::NoActiveAttempt)
                .into());
        };
        if self.screen != ExamScreen::SubmitConfirmation {
            return Err(self
                .redirect(ExamScreen::SubmitConfirmation, Advisory::ConfirmSubmit)
                .into());
        }
        self.gate(now)?;
        Ok(attempt_id)
    }

    /// Standalone re-verification outside the exam screens.
    pub fn check_reauthentication(&self, now: DateTime<Utc>) -> Result<(), VerifyRefusal> {
        match self.throttle.check(now) {
            Gate::Open => Ok(()),
            Gate::Wait { retry_after_secs } => Err(VerifyRefusal::Wait { retry_after_secs }),
            Gate::Locked => Err(VerifyRefusal::Locked),
        }
    }

    fn gate(&mut self, now: DateTime<Utc>) -> Result<(), VerifyRefusal> {
        match self.throttle.check(now) {
            Gate::Open => Ok(()),
            Gate::Wait { retry_after_secs } => Err(VerifyRefusal::Wait { retry_after_secs }),
            Gate::Locked => {
                self.move_to(ExamScreen::Blocked);
                Err(VerifyRefusal::Locked)
            }
        }
    }

    /// Records a rejected password; locks the flow at the cap.
    pub fn record_failed_verification(&mut self, now: DateTime<Utc>) -> Gate {
        let gate = self.throttle.record_failure(now);
        if gate == Gate::Locked {
            self.move_to(ExamScreen::Blocked);
        }
        gate
    }

    pub fn record_successful_verification(&mut self) {
        self.throttle.record_success();
    }

    /// PasswordVerification → ExamInterface once the attempt exists.
    pub fn enter_exam(&mut self, attempt_id: impl Into<String>) {
        self.throttle.record_success();
        self.context.current_attempt_id = Some(attempt_id.into());
        self.context.result_id = None;
        self.move_to(ExamScreen::ExamInterface);
    }

    /// Restores a session around an attempt that is still running, e.g.
    /// after a restart or from a second tab.
    pub fn resume(&mut self, quiz: SelectedQuiz, attempt_id: impl Into<String>) {
        self.context = SessionContext {
            current_test: Some(quiz),
            from_rules: true,
            exam_fullscreen_required: true,
            current_attempt_id: Some(attempt_id.into()),
            result_id: None,
        };
        self.move_to(ExamScreen::ExamInterface);
    }

    /// ExamInterface → SubmitConfirmation.
    pub fn request_submit(&mut self) -> Result<(), Redirect> {
        if self.throttle.is_locked() {
            return Err(self.redirect(ExamScreen::Blocked, Advisory::VerificationLocked));
        }
        self.navigate(ExamScreen::SubmitConfirmation).map(|_| ())
    }

    /// SubmitConfirmation → ExamInterface.
    pub fn cancel_submit(&mut self) -> Result<(), Redirect> {
        if self.throttle.is_locked() {
            return Err(self.redirect(ExamScreen::Blocked, Advisory::VerificationLocked));
        }
        self.navigate(ExamScreen::ExamInterface).map(|_| ())
    }

    /// SubmitConfirmation → ResultsReview. Clears every marker but the
    /// result under review.
    pub fn complete(&mut self, result_id: impl Into<String>) {
        self.throttle.record_success();
        self.context = SessionContext {
            result_id: Some(result_id.into()),
            ..SessionContext::default()
        };
        self.move_to(ExamScreen::ResultsReview);
    }

    /// Leaving the exam. Without confirmation the user stays on the exam
    /// screen; with it the caller gets the attempt to abandon.
    pub fn leave(&mut self, confirmed: bool) -> Result<Option<String>, Redirect> {
        if !self.exam_active() {
            self.navigate(ExamScreen::Dashboard)?;
            return Ok(None);
        }
        if !confirmed {
            let screen = self.exam_screen();
            return Err(self.redirect(screen, Advisory::ConfirmLeave));
        }
        Ok(self.context.current_attempt_id.clone())
    }

    /// Tears the session down to the dashboard after an abandoned attempt.
    pub fn abandon(&mut self) {
        self.clear();
        self.move_to(ExamScreen::Dashboard);
    }

    /// ResultsReview → Dashboard.
    pub fn finish_review(&mut self) -> Result<(), Redirect> {
        if self.context.result_id.is_none() {
            return self.navigate(ExamScreen::ResultsReview).map(|_| ());
        }
        self.clear();
        self.move_to(ExamScreen::Dashboard);
        Ok(())
    }

    /// Support escalation: lifts the verification lock and returns the user
    /// to where the flow halted.
    pub fn reset_lock(&mut self) {
        self.throttle.reset();
        let screen = if self.exam_active() {
            ExamScreen::SubmitConfirmation
        } else if self.context.from_rules && self.context.current_test.is_some() {
            ExamScreen::PasswordVerification
        } else {
            self.clear();
            ExamScreen::Dashboard
        };
        self.move_to(screen);
    }
}

/// Outcome of resolving a client route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    pub path: String,
    pub redirected: bool,
    pub advisory: Option<Advisory>,
}

/// Routes reachable without a session.
pub fn is_public_route(path: &str) -> bool {
    matches!(path.trim_end_matches('/'), "" | "/login" | "/register")
}

/// Resolves a non-exam route for the caller's role: anonymous callers are
/// sent to `/login` for anything protected, signed-in callers are sent from
/// the public pages and from other roles' dashboards to their own.
pub fn resolve_route(role: Option<Role>, path: &str) -> RouteDecision {
    let stay = || RouteDecision {
        path: path.to_string(),
        redirected: false,
        advisory: None,
    };

    let Some(role) = role else {
        if is_public_route(path) {
            return stay();
        }
        return RouteDecision {
            path: ExamScreen::Unauthenticated.route(Role::Student).to_string(),
            redirected: true,
            advisory: Some(Advisory::LoginRequired),
        };
    };

    if is_public_route(path) {
        return RouteDecision {
            path: role.dashboard_route().to_string(),
            redirected: true,
            advisory: None,
        };
    }

    let dashboards = [Role::Student, Role::Teacher, Role::Admin].map(|r| r.dashboard_route());
    let trimmed = path.trim_end_matches('/');
    if dashboards.contains(&trimmed) && trimmed != role.dashboard_route() {
        return RouteDecision {
            path: role.dashboard_route().to_string(),
            redirected: true,
            advisory: Some(Advisory::WrongDashboard),
        };
    }

    stay()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz() -> SelectedQuiz {
        SelectedQuiz {
            quiz_id: "quiz-1".into(),
            title: "Aptitude Test".into(),
            duration_minutes: 30,
            question_count: 20,
        }
    }

    fn in_exam() -> ExamSession {
        let mut s = ExamSession::new("u1");
        s.select_quiz(quiz()).unwrap();
        s.acknowledge_rules().unwrap();
        s.check_entry_verification(Utc::now()).unwrap();
        s.enter_exam("attempt-1");
        s
    }

    #[test]
    fn happy_path_walks_every_screen() {
        let mut s = ExamSession::new("u1");
        assert_eq!(s.screen(), ExamScreen::Dashboard);

        s.select_quiz(quiz()).unwrap();
        assert_eq!(s.screen(), ExamScreen::RulesInstructions);

        s.acknowledge_rules().unwrap();
        assert_eq!(s.screen(), ExamScreen::PasswordVerification);
        assert!(s.context().from_rules);
        assert!(s.context().exam_fullscreen_required);

        s.check_entry_verification(Utc::now()).unwrap();
        s.enter_exam("attempt-1");
        assert_eq!(s.screen(), ExamScreen::ExamInterface);

        s.request_submit().unwrap();
        assert_eq!(s.screen(), ExamScreen::SubmitConfirmation);
        assert_eq!(s.check_submit_verification(Utc::now()).unwrap(), "attempt-1");

        s.complete("attempt-1");
        assert_eq!(s.screen(), ExamScreen::ResultsReview);
        assert_eq!(s.context().current_attempt_id, None);
        assert!(!s.context().from_rules);
        assert!(s.context().current_test.is_none());

        s.finish_review().unwrap();
        assert_eq!(s.screen(), ExamScreen::Dashboard);
        assert_eq!(s.context(), &SessionContext::default());
    }

    #[test]
    fn exam_interface_without_attempt_goes_to_dashboard() {
        let setups: [fn(&mut ExamSession); 3] = [
            |_: &mut ExamSession| {},
            |s: &mut ExamSession| s.select_quiz(quiz()).unwrap(),
            |s: &mut ExamSession| {
                s.select_quiz(quiz()).unwrap();
                s.acknowledge_rules().unwrap();
            },
        ];
        for setup in setups {
            let mut s = ExamSession::new("u1");
            setup(&mut s);
            let redirect = s.navigate(ExamScreen::ExamInterface).unwrap_err();
            assert_eq!(redirect.to, ExamScreen::Dashboard);
            assert_eq!(redirect.advisory, Advisory::NoActiveAttempt);
            assert_eq!(s.screen(), ExamScreen::Dashboard);
        }
    }

    #[test]
    fn password_verification_without_rules_goes_to_rules() {
        let mut fresh = ExamSession::new("u1");
        let redirect = fresh.navigate(ExamScreen::PasswordVerification).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::RulesInstructions);

        let mut selected = ExamSession::new("u1");
        selected.select_quiz(quiz()).unwrap();
        let redirect = selected.navigate(ExamScreen::PasswordVerification).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::RulesInstructions);
        assert_eq!(redirect.advisory, Advisory::AcknowledgeRulesFirst);
    }

    #[test]
    fn exam_cannot_be_reentered_after_submission() {
        let mut s = in_exam();
        s.request_submit().unwrap();
        s.complete("attempt-1");

        let redirect = s.navigate(ExamScreen::ExamInterface).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::ResultsReview);
        assert_eq!(redirect.advisory, Advisory::AlreadySubmitted);

        s.finish_review().unwrap();
        let redirect = s.navigate(ExamScreen::ExamInterface).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::Dashboard);
    }

    #[test]
    fn leaving_mid_exam_needs_confirmation() {
        let mut s = in_exam();

        let redirect = s.navigate(ExamScreen::Dashboard).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::ExamInterface);
        assert_eq!(redirect.advisory, Advisory::ConfirmLeave);

        assert!(s.leave(false).is_err());
        assert_eq!(s.screen(), ExamScreen::ExamInterface);

        assert_eq!(s.leave(true).unwrap().as_deref(), Some("attempt-1"));
        s.abandon();
        assert_eq!(s.screen(), ExamScreen::Dashboard);
        assert!(!s.exam_active());
    }

    #[test]
    fn unavailable_quiz_returns_to_dashboard() {
        let mut s = ExamSession::new("u1");
        s.select_quiz(quiz()).unwrap();
        let redirect = s.quiz_unavailable();
        assert_eq!(redirect.to, ExamScreen::Dashboard);
        assert_eq!(redirect.advisory, Advisory::QuizUnavailable);
        assert!(s.context().current_test.is_none());

        let mut busy = in_exam();
        assert_eq!(busy.quiz_unavailable().advisory, Advisory::ExamInProgress);
    }

    #[test]
    fn selecting_another_quiz_mid_exam_is_refused() {
        let mut s = in_exam();
        let redirect = s.select_quiz(quiz()).unwrap_err();
        assert_eq!(redirect.advisory, Advisory::ExamInProgress);
        assert_eq!(s.current_attempt_id(), Some("attempt-1"));
    }

    #[test]
    fn submit_from_exam_screen_asks_for_confirmation_first() {
        let mut s = in_exam();
        let refusal = s.check_submit_verification(Utc::now()).unwrap_err();
        assert_eq!(
            refusal,
            VerifyRefusal::Redirect(Redirect {
                to: ExamScreen::SubmitConfirmation,
                advisory: Advisory::ConfirmSubmit,
            })
        );
        assert_eq!(s.screen(), ExamScreen::SubmitConfirmation);
    }

    #[test]
    fn cancel_submit_returns_to_exam() {
        let mut s = in_exam();
        s.request_submit().unwrap();
        s.cancel_submit().unwrap();
        assert_eq!(s.screen(), ExamScreen::ExamInterface);
    }

    #[test]
    fn results_need_a_result() {
        let mut s = in_exam();
        let redirect = s.navigate(ExamScreen::ResultsReview).unwrap_err();
        assert_eq!(redirect.to, ExamScreen::ExamInterface);
        assert_eq!(redirect.advisory, Advisory::NotSubmitted);
    }

    #[test]
    fn repeated_failures_throttle_then_block() {
        let mut s = ExamSession::new("u1");
        s.select_quiz(quiz()).unwrap();
        s.acknowledge_rules().unwrap();

        let t0 = Utc::now();
        for i in 0..3 {
            s.check_entry_verification(t0 + Duration::seconds(i)).unwrap();
            s.record_failed_verification(t0 + Duration::seconds(i));
        }
        assert_eq!(
            s.check_entry_verification(t0 + Duration::seconds(3)),
            Err(VerifyRefusal::Wait { retry_after_secs: 14 })
        );
        assert!(s.check_entry_verification(t0 + Duration::seconds(17)).is_ok());

        s.record_failed_verification(t0 + Duration::seconds(17));
        s.record_failed_verification(t0 + Duration::seconds(60));
        assert_eq!(s.screen(), ExamScreen::Blocked);
        assert_eq!(
            s.check_entry_verification(t0 + Duration::seconds(600)),
            Err(VerifyRefusal::Redirect(Redirect {
                to: ExamScreen::Blocked,
                advisory: Advisory::VerificationLocked,
            }))
        );

        s.reset_lock();
        assert_eq!(s.screen(), ExamScreen::PasswordVerification);
        assert!(s.check_entry_verification(t0 + Duration::seconds(601)).is_ok());
    }

    #[test]
    fn anonymous_callers_are_sent_to_login() {
        for path in ["/student-dashboard", "/admin-dashboard", "/exam/take", "/profile"] {
            let decision = resolve_route(None, path);
            assert_eq!(decision.path, "/login");
            assert!(decision.redirected);
        }
        assert!(!resolve_route(None, "/login").redirected);
    }

    #[test]
    fn login_lands_on_role_dashboard() {
        assert_eq!(resolve_route(Some(Role::Admin), "/login").path, "/admin-dashboard");
        assert_eq!(resolve_route(Some(Role::Teacher), "/login").path, "/teacher-dashboard");
        assert_eq!(resolve_route(Some(Role::Student), "/").path, "/student-dashboard");
    }

    #[test]
    fn other_roles_dashboards_redirect_home() {
        let decision = resolve_route(Some(Role::Student), "/admin-dashboard");
        assert_eq!(decision.path, "/student-dashboard");
        assert_eq!(decision.advisory, Some(Advisory::WrongDashboard));
        assert!(!resolve_route(Some(Role::Teacher), "/teacher-dashboard").redirected);
    }

    #[test]
    fn routes_map_to_screens() {
        assert_eq!(ExamScreen::from_route("/exam/take/"), Some(ExamScreen::ExamInterface));
        assert_eq!(ExamScreen::from_route("/student-dashboard"), None);
        assert_eq!(ExamScreen::Dashboard.route(Role::Teacher), "/teacher-dashboard");
    }
}
