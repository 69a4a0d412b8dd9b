//! Fixed-schedule retry policy for Bluetooth round trips.
//!
//! ```text
//! Idle -> Attempt(1)
//! Attempt(n) ok            -> Terminal(Success)
//! Attempt(1) failed        -> sleep backoff -> Attempt(2)
//! Attempt(2) failed        -> Recovering (adapter reset) -> Attempt(3)
//! Attempt(3) failed        -> Terminal(Exhausted)
//! ```

use serde::{Deserialize, Serialize};

pub const MAX_ATTEMPTS: u8 = 3;
const RESET_AFTER_ATTEMPT: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_ms: u64,
    pub adapter_down_ms: u64,
    pub adapter_settle_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 5_000,
            adapter_down_ms: 2_000,
            adapter_settle_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    SleepBackoff,
    AdapterReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_index: u8,
    pub outcome: AttemptOutcome,
    pub recovery_taken: RecoveryAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempt(u8),
    Recovering,
    Success,
    Exhausted,
}

/// Drives the state machine; the caller performs the sleeps and resets it asks for.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    state: RetryState,
    attempt: u8,
    history: Vec<RetryAttempt>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            state: RetryState::Idle,
            attempt: 0,
            history: Vec::with_capacity(MAX_ATTEMPTS as usize),
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn history(&self) -> &[RetryAttempt] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RetryAttempt> {
        self.history
    }

    /// Moves to the next attempt and returns its 1-based index.
    pub fn begin_attempt(&mut self) -> u8 {
        self.attempt = self.attempt.saturating_add(1);
        self.state = RetryState::Attempt(self.attempt);
        self.attempt
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RetryState::Success | RetryState::Exhausted)
    }

    pub fn record_success(&mut self) {
        self.history.push(RetryAttempt {
            attempt_index: self.attempt,
            outcome: AttemptOutcome::Success,
            recovery_taken: RecoveryAction::None,
        });
        self.state = RetryState::Success;
    }

    /// Records a transient failure and returns the recovery to perform before the next
    /// attempt. `None` means the policy is exhausted.
    pub fn record_failure(&mut self) -> Option<RecoveryAction> {
        let attempt_index = self.attempt;
        let (outcome, recovery, state) = if attempt_index >= MAX_ATTEMPTS {
            (AttemptOutcome::Exhausted, None, RetryState::Exhausted)
        } else if attempt_index == RESET_AFTER_ATTEMPT {
            (
                AttemptOutcome::TransientFailure,
                Some(RecoveryAction::AdapterReset),
                RetryState::Recovering,
            )
        } else {
            (
                AttemptOutcome::TransientFailure,
                Some(RecoveryAction::SleepBackoff),
                RetryState::Attempt(attempt_index),
            )
        };

        self.history.push(RetryAttempt {
            attempt_index,
            outcome,
            recovery_taken: recovery.unwrap_or(RecoveryAction::None),
        });
        self.state = state;
        recovery
    }
}
