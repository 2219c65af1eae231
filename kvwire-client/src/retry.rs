//! Retry strategies.
//!
//! A strategy only decides; the client owns the attempt loop. It is offered
//! retryable failures only (see [`ClientError::is_retryable`]).

use crate::error::ClientError;
use kvwire_protocol::Status;
use std::fmt;
use std::time::Duration;

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    TransportFailure,
    ConnectionClosed,
    ServerStatus(Status),
}

impl RetryReason {
    /// Classifies a retryable error; `None` for errors that must surface.
    pub fn from_error(err: &ClientError) -> Option<Self> {
        if !err.is_retryable() {
            return None;
        }
        match err {
            ClientError::Timeout => Some(RetryReason::Timeout),
            ClientError::TransportFailure(_) => Some(RetryReason::TransportFailure),
            ClientError::ConnectionClosed => Some(RetryReason::ConnectionClosed),
            ClientError::ServerStatus { status, .. } => Some(RetryReason::ServerStatus(*status)),
            _ => None,
        }
    }

    /// Whether the server is known not to have applied the request.
    ///
    /// A rejecting status means the write was not applied. A lost or late
    /// response leaves it unknown.
    pub fn outcome_known(&self) -> bool {
        matches!(self, RetryReason::ServerStatus(_))
    }

    /// Transport-level reasons require a fresh connection first.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            RetryReason::TransportFailure | RetryReason::ConnectionClosed
        )
    }
}

/// Everything a strategy gets to see about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts made so far, 1 after the first.
    pub attempt: u32,
    pub reason: RetryReason,
    /// Replaying the request cannot change the outcome.
    pub idempotent: bool,
    /// The frame was handed to the socket before the attempt failed.
    pub reached_wire: bool,
}

impl RetryContext {
    pub fn new(attempt: u32, reason: RetryReason) -> Self {
        Self {
            attempt,
            reason,
            idempotent: true,
            reached_wire: true,
        }
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn reached_wire(mut self, reached_wire: bool) -> Self {
        self.reached_wire = reached_wire;
        self
    }

    /// Whether sending the request again can apply it twice.
    pub fn may_duplicate(&self) -> bool {
        self.reached_wire && !self.idempotent && !self.reason.outcome_known()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetryAfter(Duration),
    GiveUp,
}

/// Decides whether a failed attempt is tried again.
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    fn decide(&self, ctx: &RetryContext) -> RetryAction;
}

/// Exponential backoff, capped, for a bounded number of attempts.
///
/// Writes whose outcome is unknown are never replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct BestEffortRetryStrategy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BestEffortRetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl BestEffortRetryStrategy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl RetryStrategy for BestEffortRetryStrategy {
    fn decide(&self, ctx: &RetryContext) -> RetryAction {
        if ctx.attempt >= self.max_attempts || ctx.may_duplicate() {
            return RetryAction::GiveUp;
        }
        RetryAction::RetryAfter(self.backoff(ctx.attempt))
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastRetryStrategy;

impl RetryStrategy for FailFastRetryStrategy {
    fn decide(&self, _ctx: &RetryContext) -> RetryAction {
        RetryAction::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_effort_backoff_grows_and_caps() {
        let strategy = BestEffortRetryStrategy {
            max_attempts: 40,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(strategy.backoff(1), Duration::from_millis(2));
        assert_eq!(strategy.backoff(2), Duration::from_millis(4));
        assert_eq!(strategy.backoff(4), Duration::from_millis(16));
        assert_eq!(strategy.backoff(6), Duration::from_millis(50));
        assert_eq!(strategy.backoff(39), Duration::from_millis(50));
    }

    #[test]
    fn test_best_effort_bounded_attempts() {
        let strategy = BestEffortRetryStrategy {
            max_attempts: 3,
            ..Default::default()
        };
        let ctx = |attempt| RetryContext::new(attempt, RetryReason::Timeout);
        assert!(matches!(strategy.decide(&ctx(1)), RetryAction::RetryAfter(_)));
        assert!(matches!(strategy.decide(&ctx(2)), RetryAction::RetryAfter(_)));
        assert_eq!(strategy.decide(&ctx(3)), RetryAction::GiveUp);
    }

    #[test]
    fn test_best_effort_keeps_unknown_writes() {
        let strategy = BestEffortRetryStrategy::default();
        let sent_write = |reason| {
            RetryContext::new(1, reason)
                .idempotent(false)
                .reached_wire(true)
        };

        assert_eq!(strategy.decide(&sent_write(RetryReason::Timeout)), RetryAction::GiveUp);
        assert_eq!(
            strategy.decide(&sent_write(RetryReason::ConnectionClosed)),
            RetryAction::GiveUp
        );
        // rejected by the server, so nothing was applied
        assert!(matches!(
            strategy.decide(&sent_write(RetryReason::ServerStatus(Status::Locked))),
            RetryAction::RetryAfter(_)
        ));
        // never left the client
        assert!(matches!(
            strategy.decide(&sent_write(RetryReason::TransportFailure).reached_wire(false)),
            RetryAction::RetryAfter(_)
        ));
    }

    #[test]
    fn test_fail_fast() {
        assert_eq!(
            FailFastRetryStrategy.decide(&RetryContext::new(
                1,
                RetryReason::ServerStatus(Status::Locked)
            )),
            RetryAction::GiveUp
        );
    }

    #[test]
    fn test_reason_classification() {
        assert_eq!(
            RetryReason::from_error(&ClientError::Timeout),
            Some(RetryReason::Timeout)
        );
        assert_eq!(
            RetryReason::from_error(&ClientError::ServerStatus {
                status: Status::TemporaryFailure,
                cas: 0
            }),
            Some(RetryReason::ServerStatus(Status::TemporaryFailure))
        );
        assert_eq!(
            RetryReason::from_error(&ClientError::ServerStatus {
                status: Status::KeyNotFound,
                cas: 0
            }),
            None
        );
        assert!(RetryReason::TransportFailure.needs_reconnect());
        assert!(!RetryReason::Timeout.outcome_known());
        assert!(RetryReason::ServerStatus(Status::Locked).outcome_known());
    }
}
