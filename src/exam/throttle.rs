// src/exam/throttle.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Consecutive failures before retries are delayed.
pub const THROTTLE_AFTER_FAILURES: u32 = 3;
/// Consecutive failures after which re-verification is locked for good.
pub const LOCK_AFTER_FAILURES: u32 = 5;
const DELAY_STEP_SECS: i64 = 5;
const MAX_DELAY_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Gate {
    Open,
    Wait { retry_after_secs: i64 },
    /// No automated retry; support has to reset the throttle.
    Locked,
}

/// Progressive delay on password re-verification.
///
/// After `n >= 3` consecutive failures the next try must wait
/// `min(n * 5, 30)` seconds; at 5 failures the gate locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReauthThrottle {
    failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl ReauthThrottle {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn remaining_tries(&self) -> u32 {
        LOCK_AFTER_FAILURES.saturating_sub(self.failures)
    }

    pub fn delay_after(failures: u32) -> Option<Duration> {
        if failures < THROTTLE_AFTER_FAILURES {
            return None;
        }
        let secs = (i64::from(failures) * DELAY_STEP_SECS).min(MAX_DELAY_SECS);
        Some(Duration::seconds(secs))
    }

    pub fn check(&self, now: DateTime<Utc>) -> Gate {
        if self.failures >= LOCK_AFTER_FAILURES {
            return Gate::Locked;
        }
        match (Self::delay_after(self.failures), self.last_failure_at) {
            (Some(delay), Some(last)) => {
                let ready_at = last + delay;
                if now < ready_at {
                    // Round up so a client waiting the advertised time is let in.
                    let millis = (ready_at - now).num_milliseconds();
                    Gate::Wait {
                        retry_after_secs: (millis + 999) / 1000,
                    }
                } else {
                    Gate::Open
                }
            }
            _ => Gate::Open,
        }
    }

    /// Records a rejected password and returns the gate for the next try.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Gate {
        self.failures = self.failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.check(now)
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_failure_at = None;
    }

    pub fn is_locked(&self) -> bool {
        self.failures >= LOCK_AFTER_FAILURES
    }
}
