//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Operation attempt:
//!     → retries.rs (run attempt under a child token, enforce budget)
//!     → On failure: classify.rs (retryable? which backoff? discard connection?)
//!     → backoff.rs (jittered sleep before the next attempt)
//!     → trace.rs (observe attempts, sleeps, final outcome)
//! ```
//!
//! # Design Decisions
//! - Budgets are non-negotiable; cancellation always stops the loop
//! - Ambiguous failures are retried only for idempotent operations
//! - Operations only return errors; all retry policy lives here

pub mod backoff;
pub mod budget;
pub mod classify;
pub mod errors;
pub mod retries;
pub mod trace;

pub use classify::{classify, unwrap_bad_connection, BackoffClass, Verdict};
pub use errors::{BudgetReason, OperationError, RetryError, StatusCode, TransportCode};
pub use retries::{retry, retry_counted, Attempted, RetryOption, RetryOptions};
pub use trace::RetryTrace;
