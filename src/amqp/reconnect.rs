//! When, and how often, to retry a lost broker connection.
//!
//! The [`Reconnector`] is a plain state machine over a clock value passed in by
//! the caller; the publisher owns the actual timer task and feeds the outcome
//! of each attempt back in.
//!
//! ```text
//! Idle --failure--> (window open?) --yes--> Retrying --connected--> Idle
//!                        |                     |
//!                        no                 failure (loop)
//!                        v
//!                    Exhausted
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ReconnectSettings;
use crate::utils::error::{ExhaustReason, ReconnectExhausted};

/// Lower bound on the wait before an attempt, so a zero delay cannot spin.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Length of the retry window; zero disables reconnection.
    pub retry_timeout: Duration,
    pub retry_delay: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            retry_timeout: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.retry_timeout.is_zero()
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            retry_timeout: settings.retry_timeout(),
            retry_delay: settings.retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    /// Connected, or never failed.
    Idle,
    /// An attempt is scheduled or in flight.
    Retrying,
    /// Gave up; terminal.
    Exhausted,
}

/// What the caller must do after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Schedule attempt number `attempt` after `delay`, never shorter than
    /// [`MIN_RETRY_DELAY`].
    Retry { delay: Duration, attempt: u32 },
    /// An attempt is already pending; it will report on its own.
    AlreadyPending,
    /// Cancel any pending attempt and emit the terminal error.
    Exhausted(ReconnectExhausted),
    /// Already exhausted earlier.
    Ignore,
}

#[derive(Debug)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    deadline: Option<Instant>,
    attempts: u32,
    pending: bool,
    phase: ReconnectPhase,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            deadline: None,
            attempts: 0,
            pending: false,
            phase: ReconnectPhase::Idle,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A connection error or unexpected close happened at `now`.
    ///
    /// The deadline is fixed by the first failure of an episode and only cleared
    /// by [`on_connected`](Self::on_connected).
    pub fn on_failure(&mut self, now: Instant, last_error: &str) -> Decision {
        if self.phase == ReconnectPhase::Exhausted {
            return Decision::Ignore;
        }

        if self.policy.is_disabled() {
            self.phase = ReconnectPhase::Exhausted;
            self.pending = false;
            return Decision::Exhausted(ReconnectExhausted {
                reason: ExhaustReason::Disabled,
                attempts: 0,
                last_error: last_error.to_string(),
                retry_timeout: self.policy.retry_timeout,
                retry_delay: self.policy.retry_delay,
            });
        }

        let deadline = *self
            .deadline
            .get_or_insert_with(|| now + self.policy.retry_timeout);

        if now < deadline {
            if self.pending {
                return Decision::AlreadyPending;
            }
            self.attempts += 1;
            self.pending = true;
            self.phase = ReconnectPhase::Retrying;
            Decision::Retry {
                delay: self.policy.retry_delay.max(MIN_RETRY_DELAY),
                attempt: self.attempts,
            }
        } else {
            self.phase = ReconnectPhase::Exhausted;
            self.pending = false;
            Decision::Exhausted(ReconnectExhausted {
                reason: ExhaustReason::Timeout,
                attempts: self.attempts,
                last_error: last_error.to_string(),
                retry_timeout: self.policy.retry_timeout,
                retry_delay: self.policy.retry_delay,
            })
        }
    }

    /// The pending attempt ran, successfully or not.
    pub fn attempt_finished(&mut self) {
        self.pending = false;
    }

    /// Forgets a pending attempt that was cancelled before it ran.
    pub fn cancel(&mut self) {
        self.pending = false;
    }

    /// A connection was established; ends the failure episode.
    pub fn on_connected(&mut self) {
        self.deadline = None;
        self.attempts = 0;
        self.pending = false;
        self.phase = ReconnectPhase::Idle;
    }
}
