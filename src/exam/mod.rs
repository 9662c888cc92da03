// src/exam/mod.rs

//! Server-side exam flow: the screen guard, its re-verification throttle
//! and the per-user session registry.

pub mod guard;
pub mod session;
pub mod throttle;

pub use guard::{Advisory, ExamScreen, ExamSession, Redirect, SelectedQuiz, VerifyRefusal};
pub use session::{SessionRegistry, SharedSession};
