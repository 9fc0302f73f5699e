//! Retry engine.
//!
//! # Responsibilities
//! - Run an operation until it succeeds, fails for good, or runs out of budget
//! - Sleep a jittered backoff between attempts
//! - Abort both the in-flight attempt and any pending sleep on cancellation
//!
//! # Design Decisions
//! - Ambiguous failures are retried only for idempotent operations
//! - A default attempt cap applies; unbounded retrying is an explicit opt-in
//! - The caller's token is checked at the top of every iteration
//! - Every attempt gets a child token so the operation can stop cooperatively
//! - A canceled attempt is awaited until it winds down (bounded by
//!   `ATTEMPT_GRACE`), so transactions roll back and sessions go back to
//!   their pool; an attempt that still succeeds is reported as a success

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics::MetricsTrace;
use crate::resilience::backoff::{Backoff, BackoffPolicy};
use crate::resilience::budget::Budget;
use crate::resilience::classify::classify;
use crate::resilience::errors::{BudgetReason, OperationError, RetryError, TransportCode};
use crate::resilience::trace::RetryTrace;

/// Attempt cap applied unless overridden.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// How long a canceled attempt may take to clean up before it is dropped.
pub const ATTEMPT_GRACE: Duration = Duration::from_secs(5);

/// One retry setting. Applied in order on top of the defaults.
#[derive(Clone)]
pub enum RetryOption {
    /// The operation may run more than once with the same effect.
    Idempotent(bool),
    MaxAttempts(u32),
    /// Remove the attempt cap. Only the token and timeout stop the loop.
    Unbounded,
    /// Total time allowed for all attempts and sleeps.
    OperationTimeout(Duration),
    /// Time allowed for a single attempt.
    CancelAfter(Duration),
    FastBackoff(BackoffPolicy),
    SlowBackoff(BackoffPolicy),
    Trace(Arc<dyn RetryTrace>),
    /// Name used in logs and metrics.
    Label(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum RetryOptionsError {
    #[error("max attempts must be greater than zero")]
    ZeroAttempts,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{tier} backoff jitter {jitter} is outside [0, 1]")]
    InvalidJitter { tier: &'static str, jitter: f64 },
    #[error("{tier} backoff base must be positive and not above its cap")]
    InvalidBackoff { tier: &'static str },
}

/// Immutable settings for one retry call.
#[derive(Clone)]
pub struct RetryOptions {
    pub idempotent: bool,
    /// `None` means unbounded.
    pub max_attempts: Option<u32>,
    pub operation_timeout: Option<Duration>,
    pub cancel_after: Option<Duration>,
    pub backoff: Backoff,
    pub trace: Arc<dyn RetryTrace>,
    pub label: String,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            idempotent: false,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            operation_timeout: None,
            cancel_after: None,
            backoff: Backoff::default(),
            trace: Arc::new(MetricsTrace),
            label: "operation".to_string(),
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("idempotent", &self.idempotent)
            .field("max_attempts", &self.max_attempts)
            .field("operation_timeout", &self.operation_timeout)
            .field("cancel_after", &self.cancel_after)
            .field("backoff", &self.backoff)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl RetryOptions {
    /// Apply `options` in order to the defaults and validate the result.
    pub fn from_options(
        options: impl IntoIterator<Item = RetryOption>,
    ) -> Result<Self, RetryOptionsError> {
        Self::default().with_options(options)
    }

    /// Layer `options` on top of these settings and validate the result.
    pub fn with_options(
        mut self,
        options: impl IntoIterator<Item = RetryOption>,
    ) -> Result<Self, RetryOptionsError> {
        for option in options {
            match option {
                RetryOption::Idempotent(v) => self.idempotent = v,
                RetryOption::MaxAttempts(n) => self.max_attempts = Some(n),
                RetryOption::Unbounded => self.max_attempts = None,
                RetryOption::OperationTimeout(t) => self.operation_timeout = Some(t),
                RetryOption::CancelAfter(t) => self.cancel_after = Some(t),
                RetryOption::FastBackoff(p) => self.backoff.fast = p,
                RetryOption::SlowBackoff(p) => self.backoff.slow = p,
                RetryOption::Trace(t) => self.trace = t,
                RetryOption::Label(l) => self.label = l,
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), RetryOptionsError> {
        if self.max_attempts == Some(0) {
            return Err(RetryOptionsError::ZeroAttempts);
        }
        if self.operation_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RetryOptionsError::ZeroDuration("operation timeout"));
        }
        if self.cancel_after.is_some_and(|t| t.is_zero()) {
            return Err(RetryOptionsError::ZeroDuration("cancel-after"));
        }
        for (tier, policy) in [("fast", &self.backoff.fast), ("slow", &self.backoff.slow)] {
            if !(0.0..=1.0).contains(&policy.jitter) {
                return Err(RetryOptionsError::InvalidJitter {
                    tier,
                    jitter: policy.jitter,
                });
            }
            if policy.base.is_zero() || policy.base > policy.max {
                return Err(RetryOptionsError::InvalidBackoff { tier });
            }
        }
        Ok(())
    }
}

/// A successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Retry `operation` under `options`. See [`retry_counted`].
pub async fn retry<T, F, Fut>(
    token: &CancellationToken,
    options: &RetryOptions,
    operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    retry_counted(token, options, operation)
        .await
        .map(|attempted| attempted.value)
}

/// Retry `operation` under `options`, reporting how many attempts a
/// success took.
///
/// Each attempt receives a child of `token`. The loop ends on success, on a
/// failure that must not be retried, when the attempt cap is reached, or
/// when `token` is canceled or the operation timeout passes.
pub async fn retry_counted<T, F, Fut>(
    token: &CancellationToken,
    options: &RetryOptions,
    mut operation: F,
) -> Result<Attempted<T>, RetryError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    let operation_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "retry",
        operation_id = %operation_id,
        label = %options.label,
        idempotent = options.idempotent,
    );

    let result = run_loop(token, options, &mut operation)
        .instrument(span.clone())
        .await;

    let _entered = span.enter();
    match &result {
        Ok(attempted) => {
            tracing::debug!(attempts = attempted.attempts, "Operation succeeded");
            options
                .trace
                .on_done(&options.label, attempted.attempts, None);
        }
        Err(e) => {
            tracing::warn!(attempts = e.attempts(), outcome = e.kind(), error = %e, "Operation failed");
            options.trace.on_done(&options.label, e.attempts(), Some(e));
        }
    }
    result
}

async fn run_loop<T, F, Fut>(
    token: &CancellationToken,
    options: &RetryOptions,
    operation: &mut F,
) -> Result<Attempted<T>, RetryError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    let budget = Budget::start(options.operation_timeout, options.max_attempts);
    let mut attempts = 0u32;
    let mut last_error: Option<OperationError> = None;

    loop {
        if let Err(reason) = budget.check(token) {
            return Err(RetryError::BudgetExceeded {
                attempts,
                reason,
                source: last_error,
            });
        }

        attempts += 1;
        options.trace.on_attempt(&options.label, attempts);
        tracing::debug!(attempt = attempts, "Starting attempt");

        let attempt_token = token.child_token();
        let attempt = operation(attempt_token.clone());
        tokio::pin!(attempt);

        let attempt_limit = async {
            match options.cancel_after {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let interrupt = tokio::select! {
            biased;
            _ = token.cancelled() => Interrupt::Canceled,
            _ = budget.wait_deadline() => Interrupt::Deadline,
            limit = attempt_limit => Interrupt::AttemptTimeout(limit),
            result = &mut attempt => Interrupt::Finished(result),
        };

        let result = match interrupt {
            Interrupt::Finished(result) => result,
            interrupt => {
                attempt_token.cancel();
                let settled = settle(&mut attempt).await;
                if let Some(Ok(value)) = settled {
                    return Ok(Attempted { value, attempts });
                }
                match interrupt {
                    Interrupt::AttemptTimeout(limit) => Err(OperationError::transport(
                        TransportCode::DeadlineExceeded,
                        format!("attempt canceled after {limit:?}"),
                    )),
                    Interrupt::Deadline => {
                        return Err(RetryError::BudgetExceeded {
                            attempts,
                            reason: BudgetReason::DeadlineExceeded,
                            source: last_error,
                        });
                    }
                    _ => {
                        return Err(RetryError::BudgetExceeded {
                            attempts,
                            reason: BudgetReason::Canceled,
                            source: last_error,
                        });
                    }
                }
            }
        };

        let err = match result {
            Ok(value) => return Ok(Attempted { value, attempts }),
            Err(err) => err,
        };

        let verdict = classify(&err);
        if !verdict.allows_retry(options.idempotent) {
            return Err(RetryError::Failed {
                attempts,
                source: err,
            });
        }
        if budget.attempts_exhausted(attempts) {
            return Err(RetryError::AttemptsExhausted {
                attempts,
                source: err,
            });
        }

        let delay = options.backoff.delay(verdict.backoff, attempts);
        tracing::info!(
            attempt = attempts,
            delay = ?delay,
            backoff = verdict.backoff.as_str(),
            error = %err,
            "Retrying operation"
        );
        options.trace.on_backoff(&options.label, attempts, delay, &err);
        last_error = Some(err);

        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(RetryError::BudgetExceeded {
                    attempts,
                    reason: BudgetReason::Canceled,
                    source: last_error,
                });
            }
            _ = budget.wait_deadline() => {
                return Err(RetryError::BudgetExceeded {
                    attempts,
                    reason: BudgetReason::DeadlineExceeded,
                    source: last_error,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Why an attempt stopped being awaited.
enum Interrupt<T> {
    Finished(Result<T, OperationError>),
    Canceled,
    Deadline,
    AttemptTimeout(Duration),
}

/// Wait for an attempt whose token was just canceled to wind down, so the
/// operation can roll back or return what it holds. An attempt that ignores
/// its token is dropped after [`ATTEMPT_GRACE`].
async fn settle<T, Fut>(attempt: &mut Pin<&mut Fut>) -> Option<Result<T, OperationError>>
where
    Fut: Future<Output = Result<T, OperationError>>,
{
    match tokio::time::timeout(ATTEMPT_GRACE, attempt.as_mut()).await {
        Ok(result) => Some(result),
        Err(_) => {
            tracing::warn!(grace = ?ATTEMPT_GRACE, "Canceled attempt did not finish, dropping it");
            None
        }
    }
}
