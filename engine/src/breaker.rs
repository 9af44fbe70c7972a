//! Batch-scoped circuit breaker.
//!
//! The breaker watches transfer failures for one batch session. Fatal kinds
//! (quota, auth, disk) open it immediately; per-file kinds are ignored; all
//! other kinds accumulate until `max_consecutive_errors` is reached. A trip
//! caused by network or timeout failures asks for a reconnection attempt
//! (`PauseReason::Reconnecting`) instead of giving up.
//!
//! ```text
//! Closed --trip--> Open --mark_reconnecting--> HalfOpen --mark_reconnected--> Closed
//!                   ^                             |
//!                   +----mark_reconnect_failed----+
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::{classify, ErrorKind};
use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Tripped; the batch is halted until something external happens
    Open,
    /// A reconnection attempt is in flight
    HalfOpen,
}

/// Why the breaker is holding the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    None,
    ConsecutiveErrors,
    FatalError,
    Reconnecting,
}

/// Read-only view for status banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub pause_reason: PauseReason,
    pub tripped_kind: Option<ErrorKind>,
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub should_pause: bool,
    pub is_fatal: bool,
    pub kind: ErrorKind,
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: RetryPolicy,
    state: BreakerState,
    consecutive_errors: u32,
    pause_reason: PauseReason,
    tripped_kind: Option<ErrorKind>,
}

impl CircuitBreaker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: BreakerState::Closed,
            consecutive_errors: 0,
            pause_reason: PauseReason::None,
            tripped_kind: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    pub fn tripped_kind(&self) -> Option<ErrorKind> {
        self.tripped_kind
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            pause_reason: self.pause_reason,
            tripped_kind: self.tripped_kind,
        }
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_errors = 0;
        self.pause_reason = PauseReason::None;
        self.tripped_kind = None;
    }

    /// Start of a new batch, or explicit resume after user action.
    pub fn reset(&mut self) {
        self.close();
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed || self.consecutive_errors > 0 {
            tracing::debug!(
                "Circuit breaker closed after success ({} consecutive errors cleared)",
                self.consecutive_errors
            );
        }
        self.close();
    }

    /// Classify a failure and update the breaker.
    pub fn record_failure(&mut self, raw_message: &str) -> FailureOutcome {
        let classification = classify(raw_message);
        let kind = classification.kind;
        let retryable = classification.retryable;

        if kind.is_fatal() {
            self.state = BreakerState::Open;
            self.pause_reason = PauseReason::FatalError;
            self.tripped_kind = Some(kind);
            self.consecutive_errors = 0;
            tracing::info!("Circuit breaker opened by fatal {} error: {}", kind, raw_message);
            return FailureOutcome { should_pause: true, is_fatal: true, kind, retryable };
        }

        if kind.is_per_file() {
            tracing::debug!("Per-file {} error does not count toward breaker", kind);
            return FailureOutcome { should_pause: false, is_fatal: false, kind, retryable };
        }

        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.policy.max_consecutive_errors {
            self.state = BreakerState::Open;
            self.pause_reason = if kind.is_reconnect() {
                PauseReason::Reconnecting
            } else {
                PauseReason::ConsecutiveErrors
            };
            self.tripped_kind = Some(kind);
            tracing::info!(
                "Circuit breaker opened after {} consecutive errors (last: {}, reason: {:?})",
                self.consecutive_errors,
                kind,
                self.pause_reason
            );
            return FailureOutcome { should_pause: true, is_fatal: false, kind, retryable };
        }

        tracing::debug!(
            "Recorded {} error ({}/{})",
            kind,
            self.consecutive_errors,
            self.policy.max_consecutive_errors
        );
        FailureOutcome { should_pause: false, is_fatal: false, kind, retryable }
    }

    /// Backoff before retry number `attempt` (1-indexed):
    /// `min(base * multiplier^(attempt-1), max)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = (self.policy.backoff_multiplier as u64)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let delay_ms = self
            .policy
            .base_retry_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_retry_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether a file that just failed its `attempt`-th try should be tried again.
    pub fn should_retry_file(&self, attempt: u32, kind: ErrorKind) -> bool {
        if kind.is_fatal() || kind.is_per_file() {
            return false;
        }
        attempt < self.policy.max_retries_per_file
    }

    pub fn mark_reconnecting(&mut self) {
        self.state = BreakerState::HalfOpen;
        self.pause_reason = PauseReason::Reconnecting;
        tracing::debug!("Circuit breaker half-open: reconnecting");
    }

    pub fn mark_reconnected(&mut self) {
        tracing::info!("Reconnected; circuit breaker closed");
        self.close();
    }

    pub fn mark_reconnect_failed(&mut self) {
        self.state = BreakerState::Open;
        self.pause_reason = PauseReason::FatalError;
        tracing::info!("Reconnection failed; circuit breaker open");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_network_failures_trip_with_reconnect() {
        let mut breaker = CircuitBreaker::default();

        let first = breaker.record_failure("Connection reset by peer");
        assert!(!first.should_pause);
        let second = breaker.record_failure("Connection reset by peer");
        assert!(!second.should_pause);
        let third = breaker.record_failure("Connection reset by peer");

        assert!(third.should_pause);
        assert!(!third.is_fatal);
        assert_eq!(third.kind, ErrorKind::Network);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.pause_reason(), PauseReason::Reconnecting);
        assert_eq!(breaker.tripped_kind(), Some(ErrorKind::Network));
    }

    #[test]
    fn test_generic_failures_trip_with_consecutive_errors() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure("weird failure");
        breaker.record_failure("429 slow down");
        let outcome = breaker.record_failure("weird failure");

        assert!(outcome.should_pause);
        assert_eq!(breaker.pause_reason(), PauseReason::ConsecutiveErrors);
        assert_eq!(breaker.tripped_kind(), Some(ErrorKind::Unknown));
    }

    #[test]
    fn test_fatal_trips_immediately_and_resets_counter() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure("network down");
        breaker.record_failure("network down");
        assert_eq!(breaker.consecutive_errors(), 2);

        let outcome = breaker.record_failure("Quota exceeded");
        assert!(outcome.should_pause);
        assert!(outcome.is_fatal);
        assert_eq!(outcome.kind, ErrorKind::QuotaExceeded);
        assert_eq!(breaker.consecutive_errors(), 0);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.pause_reason(), PauseReason::FatalError);

        // fresh breaker: still fatal on first sight
        let mut fresh = CircuitBreaker::default();
        let outcome = fresh.record_failure("Quota exceeded");
        assert!(outcome.should_pause && outcome.is_fatal);
    }

    #[test]
    fn test_per_file_errors_do_not_count() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..5 {
            let outcome = breaker.record_failure("550 No such file");
            assert!(!outcome.should_pause);
        }
        breaker.record_failure("file is locked");
        assert_eq!(breaker.consecutive_errors(), 0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure("timed out");
        breaker.record_failure("timed out");
        breaker.record_success();
        assert_eq!(breaker.consecutive_errors(), 0);
        let outcome = breaker.record_failure("timed out");
        assert!(!outcome.should_pause);
    }

    #[test]
    fn test_retry_delay() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(breaker.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(breaker.retry_delay(4), Duration::from_millis(8000));
        assert_eq!(breaker.retry_delay(10), Duration::from_millis(10_000));
        assert_eq!(breaker.retry_delay(200), Duration::from_millis(10_000));
    }

    #[test]
    fn test_should_retry_file() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.should_retry_file(1, ErrorKind::PathNotFound));
        assert!(!breaker.should_retry_file(1, ErrorKind::FileLocked));
        assert!(!breaker.should_retry_file(1, ErrorKind::Auth));
        assert!(breaker.should_retry_file(1, ErrorKind::Network));
        assert!(breaker.should_retry_file(1, ErrorKind::Unknown));
        assert!(!breaker.should_retry_file(2, ErrorKind::Network));
    }

    #[test]
    fn test_reconnect_flow() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_failure("timed out");
        }
        breaker.mark_reconnecting();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.pause_reason(), PauseReason::Reconnecting);

        breaker.mark_reconnected();
        assert_eq!(breaker.status(), BreakerStatus {
            state: BreakerState::Closed,
            pause_reason: PauseReason::None,
            tripped_kind: None,
        });

        for _ in 0..3 {
            breaker.record_failure("timed out");
        }
        breaker.mark_reconnecting();
        breaker.mark_reconnect_failed();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.pause_reason(), PauseReason::FatalError);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_errors(), 0);
    }
}
