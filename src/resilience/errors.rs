//! Operation and retry error types.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Transport-level failure codes, raised before or without a backend answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCode {
    /// Connection reset mid-request.
    Reset,
    /// Deadline passed before any response arrived.
    DeadlineExceeded,
    /// Connection refused or not established; nothing was sent.
    Unavailable,
    /// Local or remote transport limits hit.
    ResourceExhausted,
    Canceled,
    Unauthenticated,
    Internal,
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportCode::Reset => "RESET",
            TransportCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            TransportCode::Unavailable => "UNAVAILABLE",
            TransportCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            TransportCode::Canceled => "CANCELED",
            TransportCode::Unauthenticated => "UNAUTHENTICATED",
            TransportCode::Internal => "INTERNAL",
        })
    }
}

/// Status codes reported by the backend in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Overloaded,
    Unavailable,
    Aborted,
    BadSession,
    SessionExpired,
    SessionBusy,
    Undetermined,
    BadRequest,
    SchemeError,
    Unauthorized,
    PreconditionFailed,
    NotFound,
    AlreadyExists,
    Timeout,
    Cancelled,
    GenericError,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusCode::Overloaded => "OVERLOADED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Aborted => "ABORTED",
            StatusCode::BadSession => "BAD_SESSION",
            StatusCode::SessionExpired => "SESSION_EXPIRED",
            StatusCode::SessionBusy => "SESSION_BUSY",
            StatusCode::Undetermined => "UNDETERMINED",
            StatusCode::BadRequest => "BAD_REQUEST",
            StatusCode::SchemeError => "SCHEME_ERROR",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::GenericError => "GENERIC_ERROR",
        })
    }
}

/// A single attempt's failure.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Transport failed before or without a backend response.
    #[error("transport error {code}: {message}")]
    Transport { code: TransportCode, message: String },

    /// Backend answered with a non-success status.
    #[error("backend status {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The underlying resource is unusable and must be discarded.
    #[error("bad connection: {0}")]
    BadConnection(String),

    /// The balancer had nothing usable to offer.
    #[error("no connection available")]
    NoConnection,

    /// Every lease slot on the chosen endpoint is taken.
    #[error("lease limit reached on {address}")]
    PoolExhausted { address: String },

    /// The operation failed and so did the rollback that followed.
    #[error("{operation}; rollback failed: {rollback}")]
    RollbackFailed {
        #[source]
        operation: Box<OperationError>,
        rollback: Box<OperationError>,
    },

    /// Another error with a human-readable prefix.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<OperationError>,
    },

    /// Anything the driver does not know how to classify.
    #[error("{0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

impl OperationError {
    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn bad_connection(message: impl Into<String>) -> Self {
        Self::BadConnection(message.into())
    }

    pub fn other(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }

    pub fn rollback_failed(operation: OperationError, rollback: OperationError) -> Self {
        Self::RollbackFailed {
            operation: Box::new(operation),
            rollback: Box::new(rollback),
        }
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True if this error, or anything it wraps, is a bad connection.
    pub fn is_bad_connection(&self) -> bool {
        match self {
            Self::BadConnection(_) => true,
            Self::Context { source, .. } => source.is_bad_connection(),
            Self::RollbackFailed {
                operation,
                rollback,
            } => operation.is_bad_connection() || rollback.is_bad_connection(),
            Self::Other(err) => err
                .downcast_ref::<OperationError>()
                .is_some_and(OperationError::is_bad_connection),
            _ => false,
        }
    }
}

/// Why the retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetReason {
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BudgetReason::Canceled => "canceled",
            BudgetReason::DeadlineExceeded => "deadline exceeded",
        })
    }
}

/// Final outcome of a retry loop that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Stopped on a failure that must not be retried.
    #[error("operation failed with {attempts} attempts: {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// The attempt cap was reached.
    #[error("retry attempts exhausted after {attempts} attempts: {source}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// Deadline passed or the caller canceled.
    #[error("retry budget exceeded ({reason}) after {attempts} attempts")]
    BudgetExceeded {
        attempts: u32,
        reason: BudgetReason,
        #[source]
        source: Option<OperationError>,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. }
            | RetryError::AttemptsExhausted { attempts, .. }
            | RetryError::BudgetExceeded { attempts, .. } => *attempts,
        }
    }

    /// The last operation failure, if any attempt ran.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            RetryError::Failed { source, .. } | RetryError::AttemptsExhausted { source, .. } => {
                Some(source)
            }
            RetryError::BudgetExceeded { source, .. } => source.as_ref(),
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, RetryError::BudgetExceeded { .. })
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RetryError::Failed { .. } => "failed",
            RetryError::AttemptsExhausted { .. } => "attempts_exhausted",
            RetryError::BudgetExceeded { .. } => "budget_exceeded",
        }
    }
}
