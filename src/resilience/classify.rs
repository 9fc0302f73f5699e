//! Error classification.
//!
//! # Responsibilities
//! - Map an attempt's failure to a retry verdict
//! - Decide which backoff tier applies
//! - Flag failures that make the connection or session unusable
//!
//! # Design Decisions
//! - Classification happens only at the attempt boundary; operations just
//!   return errors
//! - Failures whose effect on the backend is unknown are retried only for
//!   idempotent operations
//! - Unknown errors are never retried

use serde::{Deserialize, Serialize};

use crate::resilience::errors::{OperationError, StatusCode, TransportCode};

/// Delay tier applied before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Retry immediately.
    None,
    Fast,
    Slow,
}

impl BackoffClass {
    pub fn as_str(self) -> &'static str {
        match self {
            BackoffClass::None => "none",
            BackoffClass::Fast => "fast",
            BackoffClass::Slow => "slow",
        }
    }
}

/// Retry decision for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub retryable: bool,
    /// The failed request may have taken effect on the backend.
    pub ambiguous: bool,
    pub backoff: BackoffClass,
    /// The connection that served the attempt must not be reused.
    pub invalidates_connection: bool,
    /// The backend session bound to the connection is gone.
    pub stale_session: bool,
}

impl Verdict {
    pub const NON_RETRYABLE: Verdict = Verdict {
        retryable: false,
        ambiguous: false,
        backoff: BackoffClass::None,
        invalidates_connection: false,
        stale_session: false,
    };

    fn retry(backoff: BackoffClass) -> Self {
        Verdict {
            retryable: true,
            ambiguous: false,
            backoff,
            invalidates_connection: false,
            stale_session: false,
        }
    }

    fn ambiguous(mut self) -> Self {
        self.ambiguous = true;
        self
    }

    fn invalidating(mut self) -> Self {
        self.invalidates_connection = true;
        self
    }

    fn stale(mut self) -> Self {
        self.stale_session = true;
        self
    }

    /// Whether another attempt is allowed for this failure.
    pub fn allows_retry(&self, idempotent: bool) -> bool {
        self.retryable && (idempotent || !self.ambiguous)
    }
}

/// Classify a failure.
pub fn classify(err: &OperationError) -> Verdict {
    match err {
        OperationError::Transport { code, .. } => classify_transport(*code),
        OperationError::Status { status, .. } => classify_status(*status),
        OperationError::BadConnection(_) => Verdict::retry(BackoffClass::Fast).invalidating(),
        OperationError::NoConnection | OperationError::PoolExhausted { .. } => {
            Verdict::retry(BackoffClass::Slow)
        }
        OperationError::RollbackFailed {
            operation,
            rollback,
        } => {
            let mut verdict = classify(operation);
            verdict.invalidates_connection |= classify(rollback).invalidates_connection;
            verdict
        }
        OperationError::Context { source, .. } => classify(source),
        OperationError::Other(err) => err
            .downcast_ref::<OperationError>()
            .map_or(Verdict::NON_RETRYABLE, classify),
    }
}

fn classify_transport(code: TransportCode) -> Verdict {
    match code {
        TransportCode::Reset | TransportCode::DeadlineExceeded => {
            Verdict::retry(BackoffClass::Fast).invalidating().ambiguous()
        }
        TransportCode::Unavailable => Verdict::retry(BackoffClass::Fast).invalidating(),
        TransportCode::ResourceExhausted => Verdict::retry(BackoffClass::Slow),
        TransportCode::Canceled | TransportCode::Unauthenticated | TransportCode::Internal => {
            Verdict::NON_RETRYABLE
        }
    }
}

fn classify_status(status: StatusCode) -> Verdict {
    match status {
        StatusCode::Overloaded | StatusCode::Unavailable => Verdict::retry(BackoffClass::Slow),
        StatusCode::Aborted => Verdict::retry(BackoffClass::None),
        StatusCode::BadSession | StatusCode::SessionExpired => {
            Verdict::retry(BackoffClass::None).stale()
        }
        StatusCode::SessionBusy => Verdict::retry(BackoffClass::Fast).stale(),
        StatusCode::Undetermined => Verdict::retry(BackoffClass::Fast).ambiguous(),
        StatusCode::BadRequest
        | StatusCode::SchemeError
        | StatusCode::Unauthorized
        | StatusCode::PreconditionFailed
        | StatusCode::NotFound
        | StatusCode::AlreadyExists
        | StatusCode::Timeout
        | StatusCode::Cancelled
        | StatusCode::GenericError => Verdict::NON_RETRYABLE,
    }
}

/// Collapse wrappers around a bad-connection failure into the canonical
/// [`OperationError::BadConnection`], so the owning pool discards the
/// resource. Everything else is returned unchanged.
///
/// A failed rollback is left intact: it carries two failures and neither
/// may be dropped.
pub fn unwrap_bad_connection(err: OperationError) -> OperationError {
    match err {
        OperationError::Context { context, source } => {
            let collapsible = source.is_bad_connection()
                && !matches!(*source, OperationError::RollbackFailed { .. });
            if collapsible {
                unwrap_bad_connection(*source)
            } else {
                OperationError::Context { context, source }
            }
        }
        OperationError::Other(inner) => match inner.downcast::<OperationError>() {
            Ok(op) if op.is_bad_connection() => unwrap_bad_connection(*op),
            Ok(op) => OperationError::Other(op),
            Err(inner) => OperationError::Other(inner),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_invalidate_connection() {
        for code in [
            TransportCode::Reset,
            TransportCode::DeadlineExceeded,
            TransportCode::Unavailable,
        ] {
            let v = classify(&OperationError::transport(code, "x"));
            assert!(v.retryable, "{code}");
            assert_eq!(v.backoff, BackoffClass::Fast);
            assert!(v.invalidates_connection);
        }
    }

    #[test]
    fn test_ambiguous_failures_need_idempotency() {
        let v = classify(&OperationError::transport(TransportCode::Reset, "x"));
        assert!(v.allows_retry(true));
        assert!(!v.allows_retry(false));

        let v = classify(&OperationError::status(StatusCode::Undetermined, "x"));
        assert!(!v.allows_retry(false));

        let v = classify(&OperationError::transport(TransportCode::Unavailable, "x"));
        assert!(v.allows_retry(false));
    }

    #[test]
    fn test_overload_is_slow() {
        for status in [StatusCode::Overloaded, StatusCode::Unavailable] {
            let v = classify(&OperationError::status(status, "x"));
            assert!(v.allows_retry(false));
            assert_eq!(v.backoff, BackoffClass::Slow);
            assert!(!v.invalidates_connection);
        }
    }

    #[test]
    fn test_session_statuses_are_stale() {
        let v = classify(&OperationError::status(StatusCode::BadSession, "x"));
        assert!(v.stale_session);
        assert_eq!(v.backoff, BackoffClass::None);

        let v = classify(&OperationError::status(StatusCode::SessionBusy, "x"));
        assert!(v.stale_session);
        assert_eq!(v.backoff, BackoffClass::Fast);
    }

    #[test]
    fn test_everything_else_is_not_retryable() {
        assert_eq!(
            classify(&OperationError::status(StatusCode::SchemeError, "x")),
            Verdict::NON_RETRYABLE
        );
        assert_eq!(
            classify(&OperationError::other("boom")),
            Verdict::NON_RETRYABLE
        );
        assert_eq!(
            classify(&OperationError::transport(TransportCode::Unauthenticated, "x")),
            Verdict::NON_RETRYABLE
        );
    }

    #[test]
    fn test_rollback_failure_takes_operation_verdict() {
        let err = OperationError::rollback_failed(
            OperationError::status(StatusCode::Aborted, "conflict"),
            OperationError::bad_connection("closed"),
        );
        let v = classify(&err);
        assert!(v.retryable);
        assert_eq!(v.backoff, BackoffClass::None);
        assert!(v.invalidates_connection);
    }

    #[test]
    fn test_unwrap_bad_connection() {
        let err = OperationError::bad_connection("tx broken")
            .with_context("commit")
            .with_context("attempt");
        assert!(matches!(
            unwrap_bad_connection(err),
            OperationError::BadConnection(msg) if msg == "tx broken"
        ));

        let err = OperationError::other(OperationError::bad_connection("driver gone"));
        assert!(matches!(
            unwrap_bad_connection(err),
            OperationError::BadConnection(_)
        ));

        let err = OperationError::status(StatusCode::Aborted, "x").with_context("query");
        assert!(matches!(
            unwrap_bad_connection(err),
            OperationError::Context { .. }
        ));

        let err = OperationError::rollback_failed(
            OperationError::status(StatusCode::Aborted, "x"),
            OperationError::bad_connection("y"),
        );
        assert!(matches!(
            unwrap_bad_connection(err),
            OperationError::RollbackFailed { .. }
        ));
    }
}
