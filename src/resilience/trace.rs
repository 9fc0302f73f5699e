//! Retry observation hook.

use std::time::Duration;

use crate::resilience::errors::{OperationError, RetryError};

/// Notified at retry loop boundaries. Purely observational: nothing it
/// does can change the loop's decisions.
pub trait RetryTrace: Send + Sync {
    fn on_attempt(&self, _label: &str, _attempt: u32) {}

    fn on_backoff(&self, _label: &str, _attempt: u32, _delay: Duration, _error: &OperationError) {}

    /// `error` is `None` on success.
    fn on_done(&self, _label: &str, _attempts: u32, _error: Option<&RetryError>) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl RetryTrace for NoopTrace {}
